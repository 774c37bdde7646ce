//! Handler results and their wire encoding.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use prost_reflect::{DynamicMessage, ReflectMessage};

use crate::callback::Callback;
use crate::error::DispatchError;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const BYTES_CONTENT_TYPE: &str = "application/octet-stream";

/// Value returned by a handler method.
#[derive(Debug)]
pub enum Output {
    Json(serde_json::Value),
    Text(String),
    Bytes(Bytes),
    /// Fully formed HTTP response with explicit status and headers (HTTP only).
    Response(Response),
    /// Typed protocol message (gRPC only).
    Message(DynamicMessage),
}

impl Output {
    pub(crate) fn variant(&self) -> &'static str {
        match self {
            Output::Json(_) => "json",
            Output::Text(_) => "text",
            Output::Bytes(_) => "bytes",
            Output::Response(_) => "http response",
            Output::Message(_) => "protocol message",
        }
    }
}

impl From<serde_json::Value> for Output {
    fn from(value: serde_json::Value) -> Self {
        Output::Json(value)
    }
}

impl From<String> for Output {
    fn from(value: String) -> Self {
        Output::Text(value)
    }
}

impl From<&str> for Output {
    fn from(value: &str) -> Self {
        Output::Text(value.to_string())
    }
}

impl From<Bytes> for Output {
    fn from(value: Bytes) -> Self {
        Output::Bytes(value)
    }
}

impl From<Vec<u8>> for Output {
    fn from(value: Vec<u8>) -> Self {
        Output::Bytes(Bytes::from(value))
    }
}

impl From<Response> for Output {
    fn from(value: Response) -> Self {
        Output::Response(value)
    }
}

impl From<DynamicMessage> for Output {
    fn from(value: DynamicMessage) -> Self {
        Output::Message(value)
    }
}

/// What a handler method hands back: a result, optionally paired with work to
/// run once the response has been delivered.
pub enum Reply {
    Output(Output),
    WithCallback(Output, Callback),
}

impl Reply {
    pub fn json(value: serde_json::Value) -> Self {
        Reply::Output(Output::Json(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        Reply::Output(Output::Text(value.into()))
    }

    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Reply::Output(Output::Bytes(value.into()))
    }

    pub fn response(value: Response) -> Self {
        Reply::Output(Output::Response(value))
    }

    pub fn message(value: DynamicMessage) -> Self {
        Reply::Output(Output::Message(value))
    }

    /// Attach a callback to run after the response is sent.
    pub fn with_callback(self, callback: Callback) -> Self {
        match self {
            Reply::Output(output) | Reply::WithCallback(output, _) => {
                Reply::WithCallback(output, callback)
            }
        }
    }

    pub fn into_parts(self) -> (Output, Option<Callback>) {
        match self {
            Reply::Output(output) => (output, None),
            Reply::WithCallback(output, callback) => (output, Some(callback)),
        }
    }
}

macro_rules! reply_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Reply {
                fn from(value: $ty) -> Self {
                    Reply::Output(Output::from(value))
                }
            }
        )*
    };
}

reply_from!(serde_json::Value, String, &str, Bytes, Vec<u8>, Response, DynamicMessage);

impl From<Output> for Reply {
    fn from(value: Output) -> Self {
        Reply::Output(value)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Output(output) => f.debug_tuple("Output").field(output).finish(),
            Reply::WithCallback(output, _) => f
                .debug_tuple("WithCallback")
                .field(output)
                .field(&"<callback>")
                .finish(),
        }
    }
}

/// Encode an HTTP-mode output into a response.
///
/// Plain values get a 200 and a content type derived from the variant; a
/// ready-made response passes through untouched.
pub fn encode_http(output: Output) -> Result<Response, DispatchError> {
    let (body, content_type) = match output {
        Output::Response(response) => return Ok(response),
        Output::Json(value) => {
            let body = serde_json::to_vec(&value)
                .map_err(|e| DispatchError::Encode(format!("unserializable json result: {}", e)))?;
            (Bytes::from(body), JSON_CONTENT_TYPE)
        }
        Output::Text(text) => (Bytes::from(text), TEXT_CONTENT_TYPE),
        Output::Bytes(raw) => (raw, BYTES_CONTENT_TYPE),
        Output::Message(message) => {
            return Err(DispatchError::Encode(format!(
                "protocol message '{}' returned from an http handler",
                message.descriptor().full_name()
            )))
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_of(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn json_round_trips_byte_identical() {
        let value: serde_json::Value = serde_json::from_slice(br#"{"key":"value"}"#).unwrap();
        let response = encode_http(Output::Json(value)).unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], JSON_CONTENT_TYPE);
        assert_eq!(body_of(response).await, Bytes::from_static(br#"{"key":"value"}"#));
    }

    #[tokio::test]
    async fn text_and_bytes_get_their_content_types() {
        let response = encode_http("hello world".into()).unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_CONTENT_TYPE);
        assert_eq!(body_of(response).await, "hello world");

        let response = encode_http(Output::Bytes(Bytes::from_static(&[0, 1, 2]))).unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], BYTES_CONTENT_TYPE);
        assert_eq!(body_of(response).await, Bytes::from_static(&[0, 1, 2]));
    }

    #[tokio::test]
    async fn explicit_responses_pass_through() {
        let custom = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-model-version", "3")
            .body(Body::from("made"))
            .unwrap();
        let response = encode_http(Output::Response(custom)).unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-model-version"], "3");
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn protocol_messages_are_a_contract_violation_over_http() {
        let message = crate::streaming::tests::text_message("hi");
        let err = encode_http(Output::Message(message)).unwrap_err();
        assert!(matches!(err, DispatchError::Encode(ref detail) if detail.contains("echo.Text")));
    }

    #[test]
    fn with_callback_replaces_any_previous_callback() {
        let reply = Reply::text("results")
            .with_callback(Callback::new(|| Ok(())))
            .with_callback(Callback::new(|| Ok(())));
        let (output, callback) = reply.into_parts();
        assert!(matches!(output, Output::Text(ref t) if t == "results"));
        assert!(callback.is_some());
    }
}
