use thiserror::Error;

/// Errors that can occur in pgcast-core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("failed to encode payload for {type_name}: {source}")]
    Encode {
        type_name: &'static str,
        source: serde_json::Error,
    },

    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("failed to decode payload as {type_name}: {source} (raw: {raw})")]
    Decode {
        type_name: &'static str,
        raw: String,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
