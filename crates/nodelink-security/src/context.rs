//! Per-connection frame crypto context.
//!
//! Holds the derived handshake and frame keys, the send counter and the
//! optional TOTP parameters. The receive high-water mark is not stored here;
//! callers keep an [`RxWatermark`](crate::frame::RxWatermark) per direction.

use tracing::debug;

use crate::error::{Result, SecurityError};
use crate::keys::{derive_key, DerivedKey, SharedSecret, FRAME_LABEL, HANDSHAKE_LABEL};
use crate::totp::TotpConfig;

/// Security parameters for one connection.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    /// Seal frames with AES-256-GCM.
    pub enable_encryption: bool,
    /// Sign the connect-time handshake.
    pub enable_handshake: bool,
    /// Attach a TOTP code to the handshake.
    pub enable_totp: bool,
    /// Provisioned shared secret.
    pub secret: SharedSecret,
    /// TOTP parameters, required when `enable_totp` is set.
    pub totp: Option<TotpConfig>,
}

/// Keys and send state for one connection. Keys are zeroed on drop.
#[derive(Debug)]
pub struct FrameCryptoContext {
    handshake_key: Option<DerivedKey>,
    frame_key: Option<DerivedKey>,
    tx_counter: u64,
    totp: Option<TotpConfig>,
}

impl FrameCryptoContext {
    /// Builds a context, deriving only the keys the enabled features need.
    pub fn init(config: &SecurityConfig) -> Result<Self> {
        let needs_secret = config.enable_encryption || config.enable_handshake;
        if needs_secret && config.secret.is_empty() {
            return Err(SecurityError::invalid_argument(
                "shared secret required for encryption or handshake",
            ));
        }

        let handshake_key = if config.enable_handshake {
            Some(derive_key(config.secret.as_bytes(), HANDSHAKE_LABEL)?)
        } else {
            None
        };
        let frame_key = if config.enable_encryption {
            Some(derive_key(config.secret.as_bytes(), FRAME_LABEL)?)
        } else {
            None
        };

        let totp = if config.enable_totp {
            let totp = config.totp.clone().ok_or_else(|| {
                SecurityError::invalid_argument("TOTP enabled without TOTP parameters")
            })?;
            totp.validate()?;
            Some(totp)
        } else {
            None
        };

        debug!(
            encryption = config.enable_encryption,
            handshake = config.enable_handshake,
            totp = config.enable_totp,
            "security context initialised"
        );

        Ok(Self {
            handshake_key,
            frame_key,
            tx_counter: 0,
            totp,
        })
    }

    /// Context with every feature off; frames pass through unchanged.
    pub fn disabled() -> Self {
        Self {
            handshake_key: None,
            frame_key: None,
            tx_counter: 0,
            totp: None,
        }
    }

    /// Zeroes the send counter. Never touches receive state.
    pub fn reset_counters(&mut self) {
        debug!(previous = self.tx_counter, "tx counter reset");
        self.tx_counter = 0;
    }

    /// Last counter value sealed into a frame.
    pub fn tx_counter(&self) -> u64 {
        self.tx_counter
    }

    /// Whether frames are encrypted.
    pub fn encryption_enabled(&self) -> bool {
        self.frame_key.is_some()
    }

    /// Whether handshakes are signed.
    pub fn handshake_enabled(&self) -> bool {
        self.handshake_key.is_some()
    }

    /// Whether a TOTP code accompanies the handshake.
    pub fn totp_enabled(&self) -> bool {
        self.totp.is_some()
    }

    /// Configured code length, when TOTP is enabled.
    pub fn totp_digits(&self) -> Option<u32> {
        self.totp.as_ref().map(|t| t.digits)
    }

    /// TOTP code for `unix_time`.
    pub fn compute_totp(&self, unix_time: u64) -> Result<u32> {
        self.totp_config()?.compute(unix_time)
    }

    /// Checks a TOTP code within the configured window.
    pub fn verify_totp(&self, unix_time: u64, code: u32) -> Result<bool> {
        self.totp_config()?.verify(unix_time, code)
    }

    fn totp_config(&self) -> Result<&TotpConfig> {
        self.totp
            .as_ref()
            .ok_or(SecurityError::FeatureDisabled { feature: "totp" })
    }

    pub(crate) fn frame_key(&self) -> Option<&DerivedKey> {
        self.frame_key.as_ref()
    }

    pub(crate) fn handshake_key(&self) -> Option<&DerivedKey> {
        self.handshake_key.as_ref()
    }

    pub(crate) fn next_tx_counter(&mut self) -> Result<u64> {
        self.tx_counter = self
            .tx_counter
            .checked_add(1)
            .ok_or_else(|| SecurityError::invalid_argument("tx counter exhausted"))?;
        Ok(self.tx_counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::totp::TotpSecret;

    fn full_config() -> SecurityConfig {
        SecurityConfig {
            enable_encryption: true,
            enable_handshake: true,
            enable_totp: false,
            secret: SharedSecret::from_slice(&[7u8; 32]),
            totp: None,
        }
    }

    #[test]
    fn test_init_derives_enabled_keys() {
        let ctx = FrameCryptoContext::init(&full_config()).unwrap();
        assert!(ctx.encryption_enabled());
        assert!(ctx.handshake_enabled());
        assert!(!ctx.totp_enabled());
        assert_eq!(ctx.tx_counter(), 0);
    }

    #[test]
    fn test_init_encryption_only() {
        let mut cfg = full_config();
        cfg.enable_handshake = false;
        let ctx = FrameCryptoContext::init(&cfg).unwrap();
        assert!(ctx.encryption_enabled());
        assert!(ctx.handshake_key().is_none());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let mut cfg = full_config();
        cfg.secret = SharedSecret::default();
        assert!(matches!(
            FrameCryptoContext::init(&cfg),
            Err(SecurityError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_no_features_needs_no_secret() {
        let ctx = FrameCryptoContext::init(&SecurityConfig::default()).unwrap();
        assert!(!ctx.encryption_enabled());
        assert!(!ctx.handshake_enabled());
    }

    #[test]
    fn test_counter_advance_and_reset() {
        let mut ctx = FrameCryptoContext::init(&full_config()).unwrap();
        assert_eq!(ctx.next_tx_counter().unwrap(), 1);
        assert_eq!(ctx.next_tx_counter().unwrap(), 2);
        ctx.reset_counters();
        assert_eq!(ctx.tx_counter(), 0);
        assert_eq!(ctx.next_tx_counter().unwrap(), 1);
    }

    #[test]
    fn test_totp_requires_parameters() {
        let mut cfg = full_config();
        cfg.enable_totp = true;
        assert!(FrameCryptoContext::init(&cfg).is_err());

        cfg.totp = Some(TotpConfig::new(TotpSecret::new(
            b"12345678901234567890".to_vec(),
        )));
        let ctx = FrameCryptoContext::init(&cfg).unwrap();
        assert_eq!(ctx.totp_digits(), Some(6));
        let code = ctx.compute_totp(59).unwrap();
        assert!(ctx.verify_totp(59, code).unwrap());
    }

    #[test]
    fn test_totp_disabled_is_reported() {
        let ctx = FrameCryptoContext::init(&full_config()).unwrap();
        assert!(matches!(
            ctx.compute_totp(59),
            Err(SecurityError::FeatureDisabled { feature: "totp" })
        ));
    }
}
