//! Payload codec subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request body + Content-Type
//!     → payload.rs (select kind, decode)
//!         → text.rs (charset decoding)
//!         → form.rs (url-encoded / multipart fields)
//!     → Payload handed to the handler
//!
//! Handler Reply
//!     → output.rs (split callback, encode Output → body + content type)
//!     → response written by the frontend
//! ```
//!
//! gRPC messages bypass this module: they are decoded against the protocol
//! schema by `streaming::codec`.

pub mod form;
pub mod output;
pub mod payload;
pub mod text;

pub use form::{FileRef, FormField, FormFields};
pub use output::{encode_http, Output, Reply};
pub use payload::{decode, Payload};
