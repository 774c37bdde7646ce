//! Form field decoding (url-encoded and multipart).

use std::convert::Infallible;

use bytes::{Buf, Bytes};

use crate::error::DispatchError;

/// An uploaded file.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub filename: String,
    pub content_type: Option<String>,
    data: Bytes,
}

impl FileRef {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Bytes) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }

    /// Readable byte stream over the file contents.
    pub fn reader(&self) -> impl std::io::Read {
        self.data.clone().reader()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single form field.
#[derive(Debug, Clone)]
pub enum FormField {
    Text(String),
    File(FileRef),
}

/// Form fields in submission order. Names may repeat.
#[derive(Debug, Clone, Default)]
pub struct FormFields {
    fields: Vec<(String, FormField)>,
}

impl FormFields {
    pub fn push(&mut self, name: impl Into<String>, field: FormField) {
        self.fields.push((name.into(), field));
    }

    /// First field with the given name.
    pub fn get(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    /// Every field with the given name.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FormField> + 'a {
        self.fields.iter().filter(move |(n, _)| n == name).map(|(_, f)| f)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FormField::Text(value) => Some(value),
            FormField::File(_) => None,
        }
    }

    pub fn file(&self, name: &str) -> Option<&FileRef> {
        match self.get(name)? {
            FormField::File(file) => Some(file),
            FormField::Text(_) => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FormField)> {
        self.fields.iter().map(|(n, f)| (n.as_str(), f))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

pub(crate) fn parse_urlencoded(body: &[u8]) -> FormFields {
    let mut fields = FormFields::default();
    for (name, value) in url::form_urlencoded::parse(body) {
        fields.push(name.into_owned(), FormField::Text(value.into_owned()));
    }
    fields
}

pub(crate) async fn parse_multipart(body: Bytes, boundary: String) -> Result<FormFields, DispatchError> {
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);
    let mut fields = FormFields::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;

        let value = match filename {
            Some(filename) => FormField::File(FileRef::new(filename, content_type, data)),
            None => {
                let text = String::from_utf8(data.to_vec()).map_err(|_| {
                    DispatchError::Decode(format!("form field '{}' is not valid utf-8", name))
                })?;
                FormField::Text(text)
            }
        };
        fields.push(name, value);
    }
    Ok(fields)
}

fn multipart_error(e: multer::Error) -> DispatchError {
    DispatchError::Decode(format!("invalid multipart body: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn multipart_body() -> Bytes {
        let body = "--X-BOUNDARY\r\n\
            Content-Disposition: form-data; name=\"label\"\r\n\r\n\
            setosa\r\n\
            --X-BOUNDARY\r\n\
            Content-Disposition: form-data; name=\"image\"; filename=\"flower.bin\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            \x01\x02\x03\r\n\
            --X-BOUNDARY--\r\n";
        Bytes::from(body)
    }

    #[tokio::test]
    async fn multipart_separates_text_and_files() {
        let fields = parse_multipart(multipart_body(), BOUNDARY.to_string()).await.unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.text("label"), Some("setosa"));

        let file = fields.file("image").unwrap();
        assert_eq!(file.filename, "flower.bin");
        assert_eq!(file.content_type.as_deref(), Some("application/octet-stream"));

        let mut contents = Vec::new();
        file.reader().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn truncated_multipart_is_a_decode_error() {
        let body = Bytes::from_static(b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\nvalue");
        let err = parse_multipart(body, BOUNDARY.to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode(_)));
    }

    #[test]
    fn repeated_names_are_preserved() {
        let fields = parse_urlencoded(b"tag=a&tag=b&other=c");
        let tags: Vec<_> = fields
            .get_all("tag")
            .filter_map(|f| match f {
                FormField::Text(t) => Some(t.as_str()),
                FormField::File(_) => None,
            })
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(fields.text("other"), Some("c"));
    }
}
