//! Error types for the nodelink protocol crate.

use thiserror::Error;

/// Errors raised while encoding or decoding message envelopes and payloads.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// The buffer could not be parsed as JSON or CBOR.
    #[error("malformed envelope: {reason}")]
    Malformed {
        /// What the parser rejected.
        reason: String,
    },

    /// A mandatory envelope field is absent or has the wrong type.
    #[error("missing or invalid envelope field '{field}'")]
    MissingField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The `type` field does not name a known message type.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A value cannot be represented in the target document model.
    #[error("unsupported value: {reason}")]
    UnsupportedValue {
        /// Description of the value.
        reason: String,
    },

    /// The payload does not match the shape of the requested typed message.
    #[error("invalid {message} payload: {reason}")]
    InvalidPayload {
        /// Message kind being decoded.
        message: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// CBOR serialization error.
    #[error("cbor error: {0}")]
    Cbor(String),
}

/// Result alias used throughout the protocol crate.
pub type Result<T> = std::result::Result<T, ProtoError>;
