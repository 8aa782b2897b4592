//! Authenticated frame codec (AES-256-GCM).
//!
//! Wire layout:
//!
//! ```text
//! version(1) | flags(1) | counter(8, BE) | iv(12) | ciphertext(N) | tag(16)
//! ```
//!
//! The 10-byte header is the AEAD associated data. Every rejection is reported
//! as [`SecurityError::InvalidResponse`]; the cause goes to the debug log only.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::context::FrameCryptoContext;
use crate::error::{Result, SecurityError};
use crate::keys::DerivedKey;

/// Frame format version.
pub const FRAME_VERSION: u8 = 1;
/// Bytes of `version | flags | counter`.
pub const HEADER_LEN: usize = 10;
/// AES-GCM IV length.
pub const IV_LEN: usize = 12;
/// AES-GCM tag length.
pub const TAG_LEN: usize = 16;
/// Total bytes added to each plaintext.
pub const FRAME_OVERHEAD: usize = HEADER_LEN + IV_LEN + TAG_LEN;

const BODY_OFFSET: usize = HEADER_LEN + IV_LEN;

/// Highest counter accepted on one receive direction.
///
/// Only advanced by a successful decrypt; never reset for the lifetime of the
/// receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxWatermark(u64);

impl RxWatermark {
    /// Fresh watermark; the first accepted counter must be at least 1.
    pub fn new() -> Self {
        Self(0)
    }

    /// Highest accepted counter.
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Size of the sealed frame for a plaintext of `plaintext_len` bytes.
pub fn encrypted_size(ctx: &FrameCryptoContext, plaintext_len: usize) -> usize {
    if ctx.encryption_enabled() {
        plaintext_len + FRAME_OVERHEAD
    } else {
        plaintext_len
    }
}

/// Seals `plaintext` with IVs drawn from the OS random source.
pub fn encrypt(ctx: &mut FrameCryptoContext, plaintext: &[u8]) -> Result<Vec<u8>> {
    encrypt_with(ctx, plaintext, &mut OsRng)
}

/// Seals `plaintext` with IVs drawn from `rng`.
pub fn encrypt_with<R: RngCore + CryptoRng>(
    ctx: &mut FrameCryptoContext,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; encrypted_size(ctx, plaintext.len())];
    let written = encrypt_into(ctx, plaintext, &mut out, rng)?;
    out.truncate(written);
    Ok(out)
}

/// Seals `plaintext` into `out`, returning the number of bytes written.
///
/// The send counter only advances once the buffer is known to be large enough.
pub fn encrypt_into<R: RngCore + CryptoRng>(
    ctx: &mut FrameCryptoContext,
    plaintext: &[u8],
    out: &mut [u8],
    rng: &mut R,
) -> Result<usize> {
    let needed = encrypted_size(ctx, plaintext.len());
    if out.len() < needed {
        return Err(SecurityError::BufferTooSmall {
            needed,
            available: out.len(),
        });
    }
    if !ctx.encryption_enabled() {
        out[..plaintext.len()].copy_from_slice(plaintext);
        return Ok(plaintext.len());
    }

    let counter = ctx.next_tx_counter()?;
    let cipher = cipher_for(ctx.frame_key())?;

    out[0] = FRAME_VERSION;
    out[1] = 0;
    out[2..HEADER_LEN].copy_from_slice(&counter.to_be_bytes());
    rng.fill_bytes(&mut out[HEADER_LEN..BODY_OFFSET]);

    let (head, rest) = out.split_at_mut(BODY_OFFSET);
    let (body, tail) = rest.split_at_mut(plaintext.len());
    body.copy_from_slice(plaintext);
    let tag = cipher
        .encrypt_in_place_detached(
            Nonce::from_slice(&head[HEADER_LEN..]),
            &head[..HEADER_LEN],
            body,
        )
        .map_err(|_| SecurityError::invalid_argument("plaintext too long to seal"))?;
    tail[..TAG_LEN].copy_from_slice(&tag);

    debug!(counter, len = plaintext.len(), "frame sealed");
    Ok(needed)
}

/// Opens a sealed frame, returning the plaintext.
pub fn decrypt(
    ctx: &FrameCryptoContext,
    frame: &[u8],
    rx: &mut RxWatermark,
) -> Result<Vec<u8>> {
    let mut buf = frame.to_vec();
    decrypt_in_place(ctx, &mut buf, rx)?;
    Ok(buf)
}

/// Opens a sealed frame in place; on success `buf` holds exactly the plaintext.
///
/// A counter at or below `rx` is a replay and is rejected before any
/// decryption; `rx` only moves after the tag verified. On failure `buf` is
/// left as it was.
pub fn decrypt_in_place(
    ctx: &FrameCryptoContext,
    buf: &mut Vec<u8>,
    rx: &mut RxWatermark,
) -> Result<()> {
    if !ctx.encryption_enabled() {
        return Ok(());
    }
    if buf.len() < FRAME_OVERHEAD {
        debug!(len = buf.len(), "frame shorter than overhead");
        return Err(SecurityError::InvalidResponse);
    }
    if buf[0] != FRAME_VERSION {
        debug!(version = buf[0], "unsupported frame version");
        return Err(SecurityError::InvalidResponse);
    }
    if buf[1] != 0 {
        debug!(flags = buf[1], "nonzero frame flags");
        return Err(SecurityError::InvalidResponse);
    }

    let mut counter_bytes = [0u8; 8];
    counter_bytes.copy_from_slice(&buf[2..HEADER_LEN]);
    let counter = u64::from_be_bytes(counter_bytes);
    if counter <= rx.0 {
        debug!(counter, watermark = rx.0, "replayed frame counter");
        return Err(SecurityError::InvalidResponse);
    }

    let cipher = cipher_for(ctx.frame_key())?;
    let tag_start = buf.len() - TAG_LEN;
    let mut header = [0u8; HEADER_LEN];
    header.copy_from_slice(&buf[..HEADER_LEN]);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&buf[HEADER_LEN..BODY_OFFSET]);
    let mut tag = [0u8; TAG_LEN];
    tag.copy_from_slice(&buf[tag_start..]);

    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&iv),
            &header,
            &mut buf[BODY_OFFSET..tag_start],
            Tag::from_slice(&tag),
        )
        .map_err(|_| {
            debug!(counter, "frame authentication failed");
            SecurityError::InvalidResponse
        })?;

    buf.copy_within(BODY_OFFSET..tag_start, 0);
    buf.truncate(tag_start - BODY_OFFSET);
    rx.0 = counter;
    debug!(counter, len = buf.len(), "frame opened");
    Ok(())
}

fn cipher_for(key: Option<&DerivedKey>) -> Result<Aes256Gcm> {
    let key = key.ok_or(SecurityError::FeatureDisabled {
        feature: "encryption",
    })?;
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| SecurityError::invalid_argument(e.to_string()))
}
