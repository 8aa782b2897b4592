//! Error types for the nodelink security layer.

use thiserror::Error;

/// Errors raised by a secret store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No blob is stored under the name.
    #[error("secret '{name}' not found")]
    NotFound {
        /// Requested blob name.
        name: String,
    },

    /// The name contains characters outside `[A-Za-z0-9_.-]`.
    #[error("invalid secret name '{name}'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },

    /// Backing storage failed.
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by key derivation, frame sealing, handshake and command authentication.
///
/// Authentication failures of every kind (tag mismatch, bad signature, replay)
/// collapse into [`SecurityError::InvalidResponse`]; the specific cause is only
/// ever emitted as a debug log.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Caller misuse, rejected before any cryptographic work.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// Output buffer cannot hold the result.
    #[error("buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes provided.
        available: usize,
    },

    /// Generic authentication failure.
    #[error("invalid response")]
    InvalidResponse,

    /// Key material missing while a feature is enabled.
    #[error("configuration error: {reason}")]
    Configuration {
        /// Which setting is missing or inconsistent.
        reason: String,
    },

    /// The operation needs a feature the context was built without.
    #[error("{feature} is not enabled")]
    FeatureDisabled {
        /// Feature name.
        feature: &'static str,
    },

    /// Loading key material from a store failed.
    #[error("key store: {0}")]
    KeyStore(#[from] StoreError),
}

impl SecurityError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        SecurityError::InvalidArgument {
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the security crate.
pub type Result<T> = std::result::Result<T, SecurityError>;
