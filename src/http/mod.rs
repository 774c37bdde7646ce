//! Protocol frontend subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (HTTP/1.1 or h2c)
//!     → server.rs (Axum setup, protocol mode router)
//!     → request.rs (request ID, span)
//!     → dispatch (HttpDispatcher or GrpcDispatcher)
//!     → encoded response written back, body released
//! ```

pub mod request;
pub mod server;

pub use request::X_REQUEST_ID;
pub use server::Server;
