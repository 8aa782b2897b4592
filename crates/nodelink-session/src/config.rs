//! Node configuration.
//!
//! Loaded from TOML or JSON. Secrets are carried base64 (shared secret) and
//! base32 (TOTP seed) encoded.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use nodelink_security::totp::{self, TotpConfig, TotpSecret};
use nodelink_security::{
    CommandAuthenticator, FileSecretStore, HandshakeVerifier, SecurityConfig, SharedSecret,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Result, SessionError};

/// Which end of the link this node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Publishes telemetry, executes commands.
    #[default]
    Sensor,
    /// Displays telemetry, issues commands.
    Hmi,
}

/// Frame, handshake and TOTP settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Seal frames with AES-256-GCM.
    pub enable_encryption: bool,
    /// Sign the connect-time handshake.
    pub enable_handshake: bool,
    /// Send and check a TOTP code during the handshake.
    pub enable_totp: bool,
    /// Shared secret, base64.
    pub secret_base64: String,
    /// TOTP seed, base32.
    pub totp_secret_base32: String,
    /// TOTP time step.
    pub totp_period_s: u64,
    /// TOTP code length, 6 to 8.
    pub totp_digits: u32,
    /// TOTP steps accepted either side of now.
    pub totp_window: u32,
    /// How long a handshake nonce is remembered.
    pub handshake_replay_window_ms: u64,
    /// How many handshake nonces are remembered.
    pub handshake_cache_size: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_encryption: false,
            enable_handshake: false,
            enable_totp: false,
            secret_base64: String::new(),
            totp_secret_base32: String::new(),
            totp_period_s: totp::DEFAULT_PERIOD_S,
            totp_digits: totp::DEFAULT_DIGITS,
            totp_window: totp::DEFAULT_WINDOW,
            handshake_replay_window_ms: 30_000,
            handshake_cache_size: 16,
        }
    }
}

impl std::fmt::Debug for SecuritySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecuritySettings")
            .field("enable_encryption", &self.enable_encryption)
            .field("enable_handshake", &self.enable_handshake)
            .field("enable_totp", &self.enable_totp)
            .field("secret_base64", &"[REDACTED]")
            .field("totp_secret_base32", &"[REDACTED]")
            .field("totp_period_s", &self.totp_period_s)
            .field("totp_digits", &self.totp_digits)
            .field("totp_window", &self.totp_window)
            .field("handshake_replay_window_ms", &self.handshake_replay_window_ms)
            .field("handshake_cache_size", &self.handshake_cache_size)
            .finish()
    }
}

/// Per-command authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandAuthSettings {
    /// Require an HMAC on every command.
    pub enabled: bool,
    /// Directory of the file secret store.
    pub store_dir: PathBuf,
    /// Blob name of the 32-byte command key.
    pub key_name: String,
}

impl Default for CommandAuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            store_dir: PathBuf::from("/var/lib/nodelink/secrets"),
            key_name: String::from("cmd_key"),
        }
    }
}

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Node role.
    pub role: NodeRole,
    /// Encode envelopes as CBOR when possible.
    pub prefer_cbor: bool,
    /// Bearer token presented (HMI) or expected (sensor) at connect time.
    pub auth_token: String,
    /// Frame, handshake and TOTP settings.
    pub security: SecuritySettings,
    /// Per-command authentication settings.
    pub command_auth: CommandAuthSettings,
}

impl NodeConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| SessionError::config(e.to_string())),
            "json" => {
                serde_json::from_str(&contents).map_err(|e| SessionError::config(e.to_string()))
            }
            _ => Err(SessionError::config(format!(
                "unsupported config file extension: {}",
                ext
            ))),
        }
    }

    /// Fails when an enabled feature has no usable secret.
    pub fn validate(&self) -> Result<()> {
        self.security_config()?;
        if self.command_auth.enabled && self.command_auth.key_name.is_empty() {
            return Err(SessionError::config("command_auth.key_name is empty"));
        }
        Ok(())
    }

    /// Decodes the secrets into a [`SecurityConfig`].
    pub fn security_config(&self) -> Result<SecurityConfig> {
        let s = &self.security;
        let needs_secret = s.enable_encryption || s.enable_handshake;

        let secret = if s.secret_base64.trim().is_empty() {
            if needs_secret {
                return Err(SessionError::config(
                    "encryption or handshake enabled without security.secret_base64",
                ));
            }
            SharedSecret::default()
        } else {
            let decoded = Zeroizing::new(
                STANDARD
                    .decode(s.secret_base64.trim())
                    .map_err(|e| SessionError::config(format!("security.secret_base64: {}", e)))?,
            );
            SharedSecret::from_slice(&decoded)
        };
        if needs_secret && secret.is_empty() {
            return Err(SessionError::config("security.secret_base64 decodes to nothing"));
        }

        let totp = if s.enable_totp {
            if s.totp_secret_base32.trim().is_empty() {
                return Err(SessionError::config(
                    "TOTP enabled without security.totp_secret_base32",
                ));
            }
            let secret = TotpSecret::from_base32(&s.totp_secret_base32).map_err(|e| {
                SessionError::config(format!("security.totp_secret_base32: {}", e))
            })?;
            let totp = TotpConfig {
                secret,
                period_s: s.totp_period_s,
                digits: s.totp_digits,
                window: s.totp_window,
            };
            totp.validate()
                .map_err(|e| SessionError::config(format!("security.totp: {}", e)))?;
            Some(totp)
        } else {
            None
        };

        Ok(SecurityConfig {
            enable_encryption: s.enable_encryption,
            enable_handshake: s.enable_handshake,
            enable_totp: s.enable_totp,
            secret,
            totp,
        })
    }

    /// Server-side handshake verifier for this node's token and replay settings.
    pub fn handshake_verifier(&self) -> HandshakeVerifier {
        HandshakeVerifier::new(
            self.auth_token.clone(),
            self.security.handshake_cache_size,
            self.security.handshake_replay_window_ms,
        )
    }

    /// Loads the command key when command authentication is enabled.
    pub fn command_authenticator(&self) -> Result<Option<CommandAuthenticator>> {
        if !self.command_auth.enabled {
            return Ok(None);
        }
        let store = FileSecretStore::new(&self.command_auth.store_dir);
        let mut auth = CommandAuthenticator::new();
        auth.init_from_store(&store, &self.command_auth.key_name)?;
        info!(
            key_name = %self.command_auth.key_name,
            "command authentication enabled"
        );
        Ok(Some(auth))
    }
}
