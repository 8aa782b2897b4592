//! Error types for the session layer.

use nodelink_proto::ProtoError;
use nodelink_security::SecurityError;
use thiserror::Error;

/// Errors raised by the session pipelines and configuration loading.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Envelope encoding or decoding failed.
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),

    /// Frame, handshake or key handling failed.
    #[error("security error: {0}")]
    Security(#[from] SecurityError),

    /// A command failed authentication and was dropped.
    #[error("command rejected")]
    CommandRejected,

    /// The transport could not take the frame.
    #[error("transport error: {reason}")]
    Transport {
        /// Transport-specific cause.
        reason: String,
    },

    /// Configuration is missing, malformed or inconsistent.
    #[error("configuration error: {reason}")]
    Config {
        /// What is wrong.
        reason: String,
    },

    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub(crate) fn config(reason: impl Into<String>) -> Self {
        SessionError::Config {
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the session crate.
pub type Result<T> = std::result::Result<T, SessionError>;
