//! Shared secret handling and HMAC-SHA-256 key derivation.
//!
//! Purpose keys are `HMAC-SHA-256(secret, label)` with a fixed ASCII label per
//! purpose, so the handshake key and the frame key never coincide.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, SecurityError};

/// Label for the handshake signing key.
pub const HANDSHAKE_LABEL: &str = "ws-handshake";
/// Label for the frame encryption key.
pub const FRAME_LABEL: &str = "ws-frame";
/// Length of every derived key.
pub const KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Out-of-band provisioned secret. Zeroed on drop, never printed.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    /// Takes ownership of the secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Copies the secret out of a slice.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns `true` when no secret was provisioned.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// 256-bit key derived for a single purpose.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DerivedKey([REDACTED])")
    }
}

/// Derives the key for `label` from `secret`.
pub fn derive_key(secret: &[u8], label: &str) -> Result<DerivedKey> {
    if secret.is_empty() {
        return Err(SecurityError::invalid_argument("empty shared secret"));
    }
    if label.is_empty() {
        return Err(SecurityError::invalid_argument("empty derivation label"));
    }
    Ok(DerivedKey(hmac_sha256(secret, &[label.as_bytes()])?))
}

/// HMAC-SHA-256 over the concatenation of `parts`.
pub(crate) fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| SecurityError::invalid_argument(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    let digest = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(out)
}
