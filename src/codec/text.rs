//! Charset-aware text decoding.

use encoding_rs::{Encoding, UTF_8};

use crate::error::DispatchError;

/// Decode `body` with the named charset (UTF-8 when absent).
///
/// Invalid byte sequences are an error, never replaced.
pub fn decode(body: &[u8], charset: Option<&str>) -> Result<(String, &'static str), DispatchError> {
    let encoding = match charset {
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| DispatchError::Decode(format!("unsupported charset '{}'", label)))?,
        None => UTF_8,
    };

    let text = encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .ok_or_else(|| {
            DispatchError::Decode(format!("body is not valid {}", encoding.name()))
        })?;
    Ok((text.into_owned(), encoding.name()))
}
