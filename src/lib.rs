//! Handler runtime: serves one user-supplied handler over HTTP or gRPC.
//!
//! A replica loads its configuration, constructs the handler exactly once,
//! then dispatches every request to it with bounded concurrency while
//! reporting in-flight counts to the autoscaler.

pub mod admin;
pub mod apis;
pub mod callback;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod http;
pub mod inflight;
pub mod lifecycle;
pub mod observability;
pub mod schema;
pub mod streaming;

pub use apis::ApiClient;
pub use callback::Callback;
pub use codec::{Output, Payload, Reply};
pub use config::RuntimeConfig;
pub use error::{DispatchError, HandlerError, StartupError};
pub use handler::{
    GrpcHandler, GrpcMethods, GrpcRequest, HandlerConfig, HttpHandler, HttpMethods, HttpRequest,
    InitContext,
};
pub use http::Server;
pub use inflight::{InFlightTracker, RequestCounter};
pub use lifecycle::{Runtime, Shutdown};
pub use streaming::{channel, MessageSource, MessageStream, StreamSender};
