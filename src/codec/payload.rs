//! Request payload decoding.
//!
//! The payload shape is a pure function of the declared `Content-Type`:
//!
//! | declared kind | payload |
//! |---|---|
//! | `application/json` | [`Payload::Json`] |
//! | `multipart/form-data`, `application/x-www-form-urlencoded` | [`Payload::Form`] |
//! | `text/plain[; charset=X]` | [`Payload::Text`] |
//! | anything else, or absent | [`Payload::Bytes`] |

use bytes::Bytes;

use crate::codec::form::{self, FormFields};
use crate::codec::text;
use crate::error::DispatchError;

/// Decoded request body.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Well-formed JSON document.
    Json(serde_json::Value),
    /// Text decoded with the declared charset.
    Text { value: String, charset: &'static str },
    /// Raw body, uninterpreted.
    Bytes(Bytes),
    /// Form fields, in submission order.
    Form(FormFields),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Bytes(raw) => Some(raw),
            _ => None,
        }
    }

    pub fn as_form(&self) -> Option<&FormFields> {
        match self {
            Payload::Form(fields) => Some(fields),
            _ => None,
        }
    }

    /// Deserialize a JSON payload into a concrete type.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, DispatchError> {
        match self {
            Payload::Json(value) => T::deserialize(value)
                .map_err(|e| DispatchError::Decode(format!("unexpected json shape: {}", e))),
            _ => Err(DispatchError::Decode("expected a json payload".to_string())),
        }
    }
}

/// Kind of payload a content type selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeclaredKind {
    Json,
    Multipart(String),
    UrlEncoded,
    Text(Option<String>),
    Other,
}

pub(crate) fn classify(content_type: &str) -> Result<DeclaredKind, DispatchError> {
    let mime: mime::Mime = match content_type.parse() {
        Ok(m) => m,
        Err(_) => return Ok(DeclaredKind::Other),
    };

    let kind = match mime.essence_str() {
        "application/json" => DeclaredKind::Json,
        "application/x-www-form-urlencoded" => DeclaredKind::UrlEncoded,
        "multipart/form-data" => {
            let boundary = mime
                .get_param(mime::BOUNDARY)
                .ok_or_else(|| DispatchError::Decode("multipart body without boundary".to_string()))?;
            DeclaredKind::Multipart(boundary.as_str().to_string())
        }
        "text/plain" => {
            DeclaredKind::Text(mime.get_param(mime::CHARSET).map(|c| c.as_str().to_string()))
        }
        _ => DeclaredKind::Other,
    };
    Ok(kind)
}

/// Decode a request body according to its declared content type.
///
/// Returns `Ok(None)` when there is neither a declared kind nor a body.
pub async fn decode(body: Bytes, content_type: Option<&str>) -> Result<Option<Payload>, DispatchError> {
    let content_type = match content_type {
        Some(ct) => ct,
        None if body.is_empty() => return Ok(None),
        None => return Ok(Some(Payload::Bytes(body))),
    };

    let payload = match classify(content_type)? {
        DeclaredKind::Json => {
            let value = serde_json::from_slice(&body)
                .map_err(|e| DispatchError::Decode(format!("invalid json: {}", e)))?;
            Payload::Json(value)
        }
        DeclaredKind::UrlEncoded => Payload::Form(form::parse_urlencoded(&body)),
        DeclaredKind::Multipart(boundary) => Payload::Form(form::parse_multipart(body, boundary).await?),
        DeclaredKind::Text(charset) => {
            let (value, charset) = text::decode(&body, charset.as_deref())?;
            Payload::Text { value, charset }
        }
        DeclaredKind::Other => Payload::Bytes(body),
    };
    Ok(Some(payload))
}
