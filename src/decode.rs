use serde::de::DeserializeOwned;
use std::io::Read;

use crate::error::{Error, Result};

/// A decoded body together with the bytes it came from.
#[derive(Debug, Clone)]
pub struct Decoded<T> {
    pub raw: Vec<u8>,
    pub value: T,
}

impl<T> Decoded<T> {
    pub fn into_value(self) -> T {
        self.value
    }

    /// The raw body as text, for logs and error messages.
    pub fn raw_text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }
}

/// Reads `body` to the end and decodes it as JSON.
///
/// The reader is always drained before decoding is attempted. An empty body
/// is a decode failure.
pub fn read_body_json<T, R>(mut body: R) -> Result<Decoded<T>>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut raw = Vec::new();
    body.read_to_end(&mut raw).map_err(Error::ReadBody)?;
    decode_json(raw)
}

/// Decodes bytes already in hand.
pub fn decode_json<T: DeserializeOwned>(raw: Vec<u8>) -> Result<Decoded<T>> {
    match serde_json::from_slice::<T>(&raw) {
        Ok(value) => Ok(Decoded { raw, value }),
        Err(source) => Err(Error::DecodeFailed { raw, source }),
    }
}
