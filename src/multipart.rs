use reqwest::header::HeaderValue;
use std::io::{self, Read};

use crate::error::{Error, MultipartPhase, Result};

/// The file section of a [`MultipartForm`].
#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A `multipart/form-data` body, assembled up front so that every failure
/// happens before anything goes on the wire.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) file: Option<FilePart>,
}

fn check_token(kind: &str, value: &str) -> io::Result<()> {
    if value.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{kind} is empty"),
        ));
    }
    // These would break the Content-Disposition header.
    if value.contains(['"', '\r', '\n']) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{kind} {value:?} contains a quote or line break"),
        ));
    }
    Ok(())
}

fn check_content_type(value: &str) -> io::Result<()> {
    let valid = match value.split_once('/') {
        Some((kind, sub)) => {
            !kind.is_empty()
                && !sub.is_empty()
                && !value.contains(char::is_whitespace)
                && HeaderValue::from_str(value).is_ok()
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("content type {value:?} is not a type/subtype"),
        ))
    }
}

fn fail(phase: MultipartPhase) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::Multipart { phase, source }
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a text field.
    pub fn text(mut self, name: &str, value: impl Into<String>) -> Result<Self> {
        check_token("field name", name).map_err(fail(MultipartPhase::Field))?;
        self.fields.push((name.to_string(), value.into()));
        Ok(self)
    }

    /// Adds the file part, draining `reader` into the form.
    ///
    /// Only one file part is supported; adding a second replaces the first.
    pub fn file<R: Read>(mut self, name: &str, file_name: &str, mut reader: R) -> Result<Self> {
        check_token("field name", name)
            .and_then(|_| check_token("file name", file_name))
            .map_err(fail(MultipartPhase::FilePart))?;

        let mut data = Vec::new();
        io::copy(&mut reader, &mut data).map_err(fail(MultipartPhase::Copy))?;

        self.file = Some(FilePart {
            field: name.to_string(),
            file_name: file_name.to_string(),
            content_type: "application/octet-stream".to_string(),
            data,
        });
        Ok(self)
    }

    /// Sets the content type of the file part, if there is one.
    pub fn with_file_type(mut self, content_type: &str) -> Self {
        if let Some(file) = self.file.as_mut() {
            file.content_type = content_type.to_string();
        }
        self
    }

    /// Final checks before the form goes on the wire: it must have at least
    /// one part, and the file part's content type must be a `type/subtype`
    /// usable as a header value.
    pub fn finish(self) -> Result<Self> {
        if self.fields.is_empty() && self.file.is_none() {
            return Err(fail(MultipartPhase::Finish)(io::Error::new(
                io::ErrorKind::InvalidInput,
                "form has no parts",
            )));
        }
        if let Some(file) = &self.file {
            check_content_type(&file.content_type).map_err(fail(MultipartPhase::Finish))?;
        }
        Ok(self)
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn file_part(&self) -> Option<&FilePart> {
        self.file.as_ref()
    }
}
