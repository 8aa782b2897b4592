#![warn(missing_docs)]

//! nodelink security layer
//!
//! - `frame`: AES-256-GCM frames with a strictly increasing counter
//! - `handshake`: connect-time signature, headers and nonce replay cache
//! - `totp`: RFC 6238 codes for the handshake
//! - `command_auth`: per-command HMAC with timestamp window and nonce history
//!
//! All mutable state (send counter, receive watermark, nonce history) lives in
//! values owned by the caller, one set per connection.

pub mod base32;
pub mod clock;
pub mod command_auth;
pub mod context;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod store;
pub mod totp;

pub use clock::{Clock, ManualClock, SystemClock};
pub use command_auth::{generate_mac, CommandAuthenticator, CommandRejection, NonceHistory};
pub use context::{FrameCryptoContext, SecurityConfig};
pub use error::{Result, SecurityError, StoreError};
pub use frame::{decrypt, decrypt_in_place, encrypt, encrypt_with, encrypted_size, RxWatermark};
pub use handshake::{HandshakeHeaders, HandshakeReplayCache, HandshakeVerifier};
pub use keys::{derive_key, DerivedKey, SharedSecret};
pub use store::{FileSecretStore, MemorySecretStore, SecretStore};
pub use totp::{TotpConfig, TotpSecret};
