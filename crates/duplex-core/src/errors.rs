//! Shared error types.

use thiserror::Error;

/// Failure to encode or decode a message envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was not valid JSON, or a value could not be serialized.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A correlation field was present but did not hold a usable integer.
    #[error("invalid {field} value: {value}")]
    InvalidId {
        /// Name of the offending envelope field (`ReqId` or `RespId`).
        field: &'static str,
        /// The raw JSON value found in that field.
        value: String,
    },
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
