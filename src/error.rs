//! Error taxonomy.
//!
//! `StartupError` is fatal: the process never binds its listener.
//! `DispatchError` is per request: it is logged once, turned into an encoded
//! error response, and never affects other requests or the handler instance.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::config::ConfigError;
use crate::schema::SchemaError;

/// Boxed error used for opaque sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message returned to clients when a handler fails internally.
const SAFE_HANDLER_MESSAGE: &str = "handler failed to process the request";

/// Error raised by handler code: constructor, methods or callbacks.
///
/// A handler may mark an error as a client error by attaching a 4xx status;
/// everything else is reported to the client as an opaque server error.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    status: Option<StatusCode>,
    #[source]
    source: Option<BoxError>,
}

impl HandlerError {
    /// An internal failure with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// A failure the client caused; its message is sent back verbatim.
    pub fn client(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if status.is_client_error() {
            status
        } else {
            StatusCode::BAD_REQUEST
        };
        Self {
            message: message.into(),
            status: Some(status),
            source: None,
        }
    }

    /// Wrap an arbitrary error.
    pub fn from_error(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            status: None,
            source: Some(source.into()),
        }
    }

    /// Client status attached by the handler, if any.
    pub fn client_status(&self) -> Option<StatusCode> {
        self.status
    }
}

impl From<std::io::Error> for HandlerError {
    fn from(e: std::io::Error) -> Self {
        Self::from_error(format!("io error: {}", e), e)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::from_error(format!("json error: {}", e), e)
    }
}

impl From<reqwest::Error> for HandlerError {
    fn from(e: reqwest::Error) -> Self {
        Self::from_error(format!("upstream api error: {}", e), e)
    }
}

/// Per-request failure at the dispatch boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Body does not match its declared content kind.
    #[error("malformed request body: {0}")]
    Decode(String),

    /// The handler does not implement the requested operation.
    #[error("operation '{operation}' is not implemented")]
    MethodNotAllowed {
        operation: String,
        allowed: Vec<String>,
    },

    /// The admission queue is full.
    #[error("too many requests queued")]
    Overloaded,

    /// The handler method failed.
    #[error("handler failure: {0}")]
    Handler(#[from] HandlerError),

    /// The handler returned a result variant invalid for the protocol mode.
    #[error("handler contract violation: {0}")]
    Encode(String),

    /// The client or transport went away mid-stream.
    #[error("stream aborted: {0}")]
    StreamAbort(String),
}

impl DispatchError {
    /// Stable identifier used in structured log records and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Decode(_) => "decode",
            DispatchError::MethodNotAllowed { .. } => "method_not_allowed",
            DispatchError::Overloaded => "overloaded",
            DispatchError::Handler(e) if e.client_status().is_some() => "handler_rejected",
            DispatchError::Handler(_) => "handler_failure",
            DispatchError::Encode(_) => "contract_violation",
            DispatchError::StreamAbort(_) => "stream_abort",
        }
    }

    /// HTTP status the error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::Decode(_) => StatusCode::BAD_REQUEST,
            DispatchError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            DispatchError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Handler(e) => e.client_status().unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            DispatchError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // Nobody is listening; 499 mirrors the de-facto "client closed request".
            DispatchError::StreamAbort(_) => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }

    /// Description that is safe to send to a client.
    pub fn public_message(&self) -> String {
        match self {
            DispatchError::Handler(e) if e.client_status().is_some() => e.to_string(),
            DispatchError::Handler(_) | DispatchError::Encode(_) => SAFE_HANDLER_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    /// Emit the single structured record for this failure.
    pub fn log(&self, api: &str, operation: &str) {
        match self {
            DispatchError::Handler(e) if e.client_status().is_none() => {
                let source = std::error::Error::source(e).map(ToString::to_string);
                tracing::error!(
                    error_kind = self.kind(),
                    api = %api,
                    operation = %operation,
                    error = %e,
                    source = ?source,
                    "Handler failed"
                );
            }
            DispatchError::Encode(detail) => {
                tracing::error!(
                    error_kind = self.kind(),
                    api = %api,
                    operation = %operation,
                    detail = %detail,
                    "Handler returned a result invalid for this protocol"
                );
            }
            DispatchError::StreamAbort(_) => {
                tracing::info!(
                    error_kind = self.kind(),
                    api = %api,
                    operation = %operation,
                    error = %self,
                    "Stream aborted by peer"
                );
            }
            _ => {
                tracing::warn!(
                    error_kind = self.kind(),
                    api = %api,
                    operation = %operation,
                    error = %self,
                    "Request rejected"
                );
            }
        }
    }

    /// gRPC status for the same failure.
    pub fn to_status(&self) -> tonic::Status {
        let message = self.public_message();
        match self {
            DispatchError::Decode(_) => tonic::Status::invalid_argument(message),
            DispatchError::MethodNotAllowed { .. } => tonic::Status::unimplemented(message),
            DispatchError::Overloaded => tonic::Status::resource_exhausted(message),
            DispatchError::Handler(e) => match e.client_status() {
                Some(StatusCode::NOT_FOUND) => tonic::Status::not_found(message),
                Some(StatusCode::UNAUTHORIZED) => tonic::Status::unauthenticated(message),
                Some(StatusCode::FORBIDDEN) => tonic::Status::permission_denied(message),
                Some(_) => tonic::Status::invalid_argument(message),
                None => tonic::Status::internal(message),
            },
            DispatchError::Encode(_) => tonic::Status::internal(message),
            DispatchError::StreamAbort(_) => tonic::Status::cancelled(message),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), self.public_message()).into_response();
        if let DispatchError::MethodNotAllowed { allowed, .. } = &self {
            if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                response.headers_mut().insert(header::ALLOW, value);
            }
        }
        response
    }
}

/// Failure that prevents the runtime from serving at all.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("handler contract violation: {0}")]
    Contract(String),

    #[error("handler construction failed: {0}")]
    Construction(HandlerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_failures_hide_details() {
        let err = DispatchError::Handler(HandlerError::new("db password is hunter2"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), SAFE_HANDLER_MESSAGE);
        assert_eq!(err.kind(), "handler_failure");
        assert_eq!(err.to_status().code(), tonic::Code::Internal);
    }

    #[test]
    fn client_errors_keep_their_message() {
        let err = DispatchError::Handler(HandlerError::client(StatusCode::NOT_FOUND, "no such user"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.public_message(), "no such user");
        assert_eq!(err.to_status().code(), tonic::Code::NotFound);
    }

    #[test]
    fn client_constructor_rejects_server_statuses() {
        let err = HandlerError::client(StatusCode::BAD_GATEWAY, "nope");
        assert_eq!(err.client_status(), Some(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let response = DispatchError::MethodNotAllowed {
            operation: "DELETE".into(),
            allowed: vec!["POST".into(), "GET".into()],
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST, GET");
    }

    #[test]
    fn contract_violations_are_logged_distinctly() {
        let encode = DispatchError::Encode("json result from grpc method".into());
        let handler = DispatchError::Handler(HandlerError::new("boom"));
        assert_ne!(encode.kind(), handler.kind());
        assert_eq!(encode.status_code(), handler.status_code());
    }
}
