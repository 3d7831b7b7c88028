//! Payload encoding and decoding.
//!
//! Payloads travel as the text argument of NOTIFY, which caps them at 8000
//! bytes. Values are serialized to JSON; the size check runs against the
//! UTF-8 byte length of the encoded text, before any statement is built, so
//! an oversized payload fails with a structured error instead of a server
//! round trip.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Hard ceiling on the encoded payload size, in UTF-8 bytes.
///
/// A payload of exactly this size is accepted; anything larger is rejected
/// locally with [`Error::PayloadTooLarge`].
pub const MAX_PAYLOAD_BYTES: usize = 8000;

/// A value serialized to its canonical text form, ready to be size-checked
/// and embedded in a NOTIFY statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    text: String,
}

impl EncodedPayload {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    /// Byte length of the UTF-8 encoding.
    pub fn len_bytes(&self) -> usize {
        self.text.len()
    }

    /// Enforce [`MAX_PAYLOAD_BYTES`].
    pub fn ensure_within_limit(&self) -> Result<()> {
        check_size(&self.text)
    }
}

/// Serialize a value to canonical JSON text.
pub fn encode<T: Serialize>(value: &T) -> Result<EncodedPayload> {
    let text = serde_json::to_string(value).map_err(|source| Error::Encode {
        type_name: std::any::type_name::<T>(),
        source,
    })?;

    Ok(EncodedPayload { text })
}

/// Enforce the payload size limit on an already-encoded text blob.
pub fn check_size(raw: &str) -> Result<()> {
    if raw.len() > MAX_PAYLOAD_BYTES {
        return Err(Error::PayloadTooLarge {
            size: raw.len(),
            limit: MAX_PAYLOAD_BYTES,
        });
    }
    Ok(())
}

/// Decode canonical JSON text back to a value.
///
/// Decode failures are terminal for the message that carried them; the error
/// keeps the offending raw text and the target type name so the failure is
/// diagnosable without a retry.
pub fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|source| Error::Decode {
        type_name: std::any::type_name::<T>(),
        raw: raw.to_string(),
        source,
    })
}
