//! Per-command HMAC authentication with replay protection.
//!
//! Each command envelope carries `auth = {nonce, mac, alg}` where
//!
//! ```text
//! mac = hex(HMAC-SHA-256(key, be32(v) ‖ be64(ts) ‖ nonce ‖ compact_json(payload)))
//! ```
//!
//! The receiver keeps a timestamp watermark and the last eight accepted nonces.
//! A command is accepted at most once while its nonce is in the history.

use nodelink_proto::{AuthBlock, Envelope};
use rand::{CryptoRng, RngCore};
use serde_json::Value;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, SecurityError};
use crate::keys::hmac_sha256;
use crate::store::SecretStore;

/// Command key length.
pub const COMMAND_KEY_LEN: usize = 32;
/// Largest accepted nonce.
pub const MAX_NONCE_LEN: usize = 16;
/// Nonce length used when signing.
pub const DEFAULT_SIGNING_NONCE_LEN: usize = 8;
/// Accepted nonces remembered.
pub const NONCE_HISTORY_DEPTH: usize = 8;
/// How far behind the watermark a command timestamp may lag.
pub const REPLAY_WINDOW_MS: u64 = 60_000;
/// Algorithm tag.
pub const MAC_ALG: &str = "HS256";
/// Length of a hex MAC.
pub const MAC_HEX_LEN: usize = 64;

/// Why a command was rejected. For diagnostics and tests; callers see a bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandRejection {
    /// Envelope has no `auth` block.
    #[error("no auth block")]
    MissingAuth,
    /// No key loaded.
    #[error("no command key loaded")]
    NoKey,
    /// Timestamp older than the replay window.
    #[error("stale timestamp")]
    StaleTimestamp,
    /// `alg` present but not `HS256`.
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
    /// MAC is not 64 characters.
    #[error("malformed mac")]
    MalformedMac,
    /// Nonce is not 1..=16 bytes of hex.
    #[error("malformed nonce")]
    MalformedNonce,
    /// Nonce already in the history.
    #[error("replayed nonce")]
    ReplayedNonce,
    /// Expected MAC could not be computed.
    #[error("payload not serializable")]
    Encoding,
    /// MAC mismatch.
    #[error("mac mismatch")]
    MacMismatch,
}

/// 256-bit command key. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CommandKey([u8; COMMAND_KEY_LEN]);

impl CommandKey {
    /// Copies a key, which must be exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != COMMAND_KEY_LEN {
            return Err(SecurityError::invalid_argument(format!(
                "command key must be {} bytes, got {}",
                COMMAND_KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = [0u8; COMMAND_KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; COMMAND_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for CommandKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandKey([REDACTED])")
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NonceSlot {
    nonce: [u8; MAX_NONCE_LEN],
    len: usize,
    timestamp_ms: u64,
    in_use: bool,
}

impl NonceSlot {
    fn bytes(&self) -> &[u8] {
        &self.nonce[..self.len]
    }
}

/// Fixed ring of recently accepted nonces.
///
/// New nonces go into an empty slot if there is one, otherwise they replace
/// the entry with the oldest timestamp.
#[derive(Debug, Clone, Default)]
pub struct NonceHistory {
    slots: [NonceSlot; NONCE_HISTORY_DEPTH],
}

impl NonceHistory {
    /// Whether an identical nonce is recorded.
    pub fn contains(&self, nonce: &[u8]) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.in_use && slot.bytes() == nonce)
    }

    /// Records `nonce`. Nonces longer than [`MAX_NONCE_LEN`] are ignored.
    pub fn record(&mut self, nonce: &[u8], timestamp_ms: u64) {
        if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN {
            return;
        }
        let target = match self.slots.iter().position(|slot| !slot.in_use) {
            Some(free) => free,
            None => self
                .slots
                .iter()
                .enumerate()
                .min_by_key(|(_, slot)| slot.timestamp_ms)
                .map(|(i, _)| i)
                .unwrap_or(0),
        };
        let slot = &mut self.slots[target];
        slot.nonce = [0u8; MAX_NONCE_LEN];
        slot.nonce[..nonce.len()].copy_from_slice(nonce);
        slot.len = nonce.len();
        slot.timestamp_ms = timestamp_ms;
        slot.in_use = true;
    }

    /// Number of recorded nonces.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.in_use).count()
    }

    /// Whether nothing is recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every nonce.
    pub fn clear(&mut self) {
        self.slots = [NonceSlot::default(); NONCE_HISTORY_DEPTH];
    }
}

/// Computes the lowercase hex MAC of a command.
pub fn generate_mac(
    payload: &Value,
    version: u32,
    timestamp_ms: u64,
    nonce: &[u8],
    key: &[u8],
) -> Result<String> {
    if key.is_empty() {
        return Err(SecurityError::invalid_argument("empty command key"));
    }
    if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN {
        return Err(SecurityError::invalid_argument(format!(
            "nonce must be 1..={} bytes",
            MAX_NONCE_LEN
        )));
    }
    let body = serde_json::to_vec(payload)
        .map_err(|e| SecurityError::invalid_argument(e.to_string()))?;
    let mac = hmac_sha256(
        key,
        &[
            &version.to_be_bytes(),
            &timestamp_ms.to_be_bytes(),
            nonce,
            &body,
        ],
    )?;
    Ok(hex::encode(mac))
}

/// Receiver-side command authenticator.
///
/// Owned by one session; `&mut self` on every mutating call keeps validation
/// serialized per command stream.
#[derive(Debug, Default)]
pub struct CommandAuthenticator {
    key: Option<CommandKey>,
    history: NonceHistory,
    latest_timestamp_ms: u64,
}

impl CommandAuthenticator {
    /// Authenticator with no key; rejects everything until a key is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Authenticator with `key` loaded.
    pub fn with_key(key: &[u8]) -> Result<Self> {
        let mut auth = Self::new();
        auth.set_key(key)?;
        Ok(auth)
    }

    /// Replaces the key. The previous key and the replay state are dropped first.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        let key = CommandKey::from_slice(key)?;
        self.forget_key();
        self.key = Some(key);
        debug!("command key loaded");
        Ok(())
    }

    /// Zeroes the key and clears the replay state.
    pub fn forget_key(&mut self) {
        if let Some(mut key) = self.key.take() {
            key.zeroize();
        }
        self.reset_history();
    }

    /// Clears the nonce history and watermark, keeping the key.
    pub fn reset_history(&mut self) {
        self.history.clear();
        self.latest_timestamp_ms = 0;
    }

    /// Loads the key from `store`. Any read or size error leaves no key loaded.
    pub fn init_from_store(&mut self, store: &dyn SecretStore, name: &str) -> Result<()> {
        self.forget_key();
        let blob: Zeroizing<Vec<u8>> = store.get(name).map_err(|e| {
            warn!(name, error = %e, "command key unavailable");
            SecurityError::KeyStore(e)
        })?;
        if blob.len() != COMMAND_KEY_LEN {
            warn!(name, len = blob.len(), "command key has wrong size");
            return Err(SecurityError::Configuration {
                reason: format!(
                    "command key '{}' must be {} bytes, got {}",
                    name,
                    COMMAND_KEY_LEN,
                    blob.len()
                ),
            });
        }
        self.set_key(&blob)
    }

    /// Whether a key is loaded.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Replay watermark.
    pub fn latest_timestamp_ms(&self) -> u64 {
        self.latest_timestamp_ms
    }

    /// Accepted nonces currently remembered.
    pub fn history(&self) -> &NonceHistory {
        &self.history
    }

    /// Validates a command envelope.
    pub fn validate(&mut self, env: &Envelope) -> bool {
        match self.validate_detailed(env) {
            Ok(()) => true,
            Err(reason) => {
                debug!(seq = env.sequence, %reason, "command rejected");
                false
            }
        }
    }

    /// Validates a command envelope, reporting the first failed check.
    ///
    /// Checks run in a fixed order. A fresh timestamp moves the watermark
    /// before the MAC is checked; the nonce is stored only on success.
    pub fn validate_detailed(&mut self, env: &Envelope) -> std::result::Result<(), CommandRejection> {
        let auth = env.auth.as_ref().ok_or(CommandRejection::MissingAuth)?;
        let key = self.key.as_ref().ok_or(CommandRejection::NoKey)?;

        if !timestamp_fresh(&mut self.latest_timestamp_ms, env.timestamp_ms) {
            warn!(ts = env.timestamp_ms, "rejected stale command timestamp");
            return Err(CommandRejection::StaleTimestamp);
        }
        if auth.alg.as_deref().is_some_and(|alg| alg != MAC_ALG) {
            return Err(CommandRejection::UnsupportedAlgorithm);
        }
        if auth.mac.len() != MAC_HEX_LEN {
            return Err(CommandRejection::MalformedMac);
        }
        let nonce = hex::decode(&auth.nonce).map_err(|_| CommandRejection::MalformedNonce)?;
        if nonce.is_empty() || nonce.len() > MAX_NONCE_LEN {
            return Err(CommandRejection::MalformedNonce);
        }
        if self.history.contains(&nonce) {
            warn!("rejected replayed command nonce");
            return Err(CommandRejection::ReplayedNonce);
        }

        let expected = generate_mac(
            &env.payload,
            env.version,
            env.timestamp_ms,
            &nonce,
            key.as_bytes(),
        )
        .map_err(|_| CommandRejection::Encoding)?;
        if !bool::from(auth.mac.as_bytes().ct_eq(expected.as_bytes())) {
            warn!(seq = env.sequence, "command mac mismatch");
            return Err(CommandRejection::MacMismatch);
        }

        self.history.record(&nonce, env.timestamp_ms);
        Ok(())
    }

    /// Produces an auth block with a fresh random nonce.
    pub fn sign_envelope<R: RngCore + CryptoRng>(
        &self,
        payload: &Value,
        version: u32,
        timestamp_ms: u64,
        rng: &mut R,
    ) -> Result<AuthBlock> {
        let mut nonce = [0u8; DEFAULT_SIGNING_NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        self.sign_envelope_with_nonce(payload, version, timestamp_ms, &nonce)
    }

    /// Produces an auth block for a caller-chosen nonce.
    pub fn sign_envelope_with_nonce(
        &self,
        payload: &Value,
        version: u32,
        timestamp_ms: u64,
        nonce: &[u8],
    ) -> Result<AuthBlock> {
        let key = self.key.as_ref().ok_or(SecurityError::Configuration {
            reason: "no command key loaded".to_string(),
        })?;
        let mac = generate_mac(payload, version, timestamp_ms, nonce, key.as_bytes())?;
        Ok(AuthBlock {
            nonce: hex::encode(nonce),
            mac,
            alg: Some(MAC_ALG.to_string()),
        })
    }
}

/// Applies the freshness rule and advances the watermark on success.
fn timestamp_fresh(watermark: &mut u64, timestamp_ms: u64) -> bool {
    if *watermark == 0 {
        *watermark = timestamp_ms;
        return true;
    }
    if timestamp_ms.saturating_add(REPLAY_WINDOW_MS) < *watermark {
        return false;
    }
    if timestamp_ms > *watermark {
        *watermark = timestamp_ms;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySecretStore;
    use nodelink_proto::{MessageType, WireFormat, PROTOCOL_VERSION};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    const KEY: [u8; 32] = [0x5a; 32];

    fn payload() -> Value {
        json!({"set_pwm": {"ch": 3, "duty": 1024}})
    }

    fn envelope(ts: u64, payload: Value, auth: Option<AuthBlock>) -> Envelope {
        Envelope {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Command,
            timestamp_ms: ts,
            sequence: 1,
            payload,
            crc32: 0,
            crc_valid: true,
            format: WireFormat::Json,
            auth,
        }
    }

    fn signed(signer: &CommandAuthenticator, ts: u64, nonce: &[u8]) -> Envelope {
        let auth = signer
            .sign_envelope_with_nonce(&payload(), PROTOCOL_VERSION, ts, nonce)
            .unwrap();
        envelope(ts, payload(), Some(auth))
    }

    fn pair() -> (CommandAuthenticator, CommandAuthenticator) {
        (
            CommandAuthenticator::with_key(&KEY).unwrap(),
            CommandAuthenticator::with_key(&KEY).unwrap(),
        )
    }

    #[test]
    fn test_mac_is_deterministic_and_lowercase() {
        let a = generate_mac(&payload(), 1, 1000, &[1, 2, 3], &KEY).unwrap();
        let b = generate_mac(&payload(), 1, 1000, &[1, 2, 3], &KEY).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), MAC_HEX_LEN);
        assert_eq!(a, a.to_lowercase());
    }

    #[test]
    fn test_mac_covers_every_input() {
        let base = generate_mac(&payload(), 1, 1000, &[1, 2, 3], &KEY).unwrap();
        let other_payload = json!({"set_pwm": {"ch": 3, "duty": 1025}});
        assert_ne!(base, generate_mac(&other_payload, 1, 1000, &[1, 2, 3], &KEY).unwrap());
        assert_ne!(base, generate_mac(&payload(), 2, 1000, &[1, 2, 3], &KEY).unwrap());
        assert_ne!(base, generate_mac(&payload(), 1, 1001, &[1, 2, 3], &KEY).unwrap());
        assert_ne!(base, generate_mac(&payload(), 1, 1000, &[1, 2, 4], &KEY).unwrap());
        assert_ne!(base, generate_mac(&payload(), 1, 1000, &[1, 2, 3], &[0x5b; 32]).unwrap());
    }

    #[test]
    fn test_mac_message_layout() {
        let body = serde_json::to_vec(&payload()).unwrap();
        let mut msg = Vec::new();
        msg.extend_from_slice(&1u32.to_be_bytes());
        msg.extend_from_slice(&1000u64.to_be_bytes());
        msg.extend_from_slice(&[7, 7]);
        msg.extend_from_slice(&body);
        let expected = hex::encode(hmac_sha256(&KEY, &[&msg]).unwrap());
        assert_eq!(generate_mac(&payload(), 1, 1000, &[7, 7], &KEY).unwrap(), expected);
    }

    const WIRE_GPIO_PAYLOAD: &str =
        r#"{"write_gpio":{"dev":"mcp1","port":"B","mask":15,"value":5}}"#;
    const WIRE_GPIO_MAC: &str = "4a2a4f3e6a2a0a785553de6b1c0c9b718d2d7efb825858165c3c9589644b22ba";

    #[test]
    fn test_mac_known_answer_over_wire_order() {
        let payload: Value = serde_json::from_str(WIRE_GPIO_PAYLOAD).unwrap();
        let mac = generate_mac(&payload, 1, 1000, &[1, 2, 3, 4, 5, 6, 7, 8], &KEY).unwrap();
        assert_eq!(mac, WIRE_GPIO_MAC);
    }

    #[test]
    fn test_accepts_wire_encoded_command() {
        let text = format!(
            r#"{{"v":1,"type":"cmd","ts":1000,"seq":1,"payload":{},"crc":1108596872,"auth":{{"nonce":"0102030405060708","mac":"{}","alg":"HS256"}}}}"#,
            WIRE_GPIO_PAYLOAD, WIRE_GPIO_MAC
        );
        let env = nodelink_proto::decode(text.as_bytes()).unwrap();
        assert!(env.crc_valid);
        let mut verifier = CommandAuthenticator::with_key(&KEY).unwrap();
        assert_eq!(verifier.validate_detailed(&env), Ok(()));
    }

    #[test]
    fn test_accepts_valid_command_once() {
        let (signer, mut verifier) = pair();
        let env = signed(&signer, 10_000, &[1; 8]);
        assert!(verifier.validate(&env));
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::ReplayedNonce)
        );
    }

    #[test]
    fn test_rejects_without_key() {
        let (signer, _) = pair();
        let mut verifier = CommandAuthenticator::new();
        assert_eq!(
            verifier.validate_detailed(&signed(&signer, 1, &[1])),
            Err(CommandRejection::NoKey)
        );
    }

    #[test]
    fn test_rejects_missing_auth() {
        let (_, mut verifier) = pair();
        assert_eq!(
            verifier.validate_detailed(&envelope(1, payload(), None)),
            Err(CommandRejection::MissingAuth)
        );
    }

    #[test]
    fn test_rejects_tampered_payload() {
        let (signer, mut verifier) = pair();
        let mut env = signed(&signer, 5_000, &[2; 8]);
        env.payload = json!({"set_pwm": {"ch": 4, "duty": 1024}});
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::MacMismatch)
        );
        assert!(verifier.history().is_empty());
    }

    #[test]
    fn test_rejects_uppercase_mac() {
        let (signer, mut verifier) = pair();
        let mut env = signed(&signer, 5_000, &[2; 8]);
        if let Some(auth) = env.auth.as_mut() {
            auth.mac = auth.mac.to_uppercase();
        }
        // compared against the lowercase rendering
        assert!(!verifier.validate(&env));
    }

    #[test]
    fn test_accepts_uppercase_nonce() {
        let (signer, mut verifier) = pair();
        let mut env = signed(&signer, 5_000, &[0xab; 4]);
        if let Some(auth) = env.auth.as_mut() {
            auth.nonce = auth.nonce.to_uppercase();
        }
        assert!(verifier.validate(&env));
    }

    #[test]
    fn test_rejects_bad_alg_and_shapes() {
        let (signer, mut verifier) = pair();

        let mut env = signed(&signer, 5_000, &[3; 8]);
        env.auth.as_mut().unwrap().alg = Some("HS512".to_string());
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::UnsupportedAlgorithm)
        );

        let mut env = signed(&signer, 5_000, &[3; 8]);
        env.auth.as_mut().unwrap().alg = None;
        assert!(verifier.validate(&env));

        let mut env = signed(&signer, 5_000, &[4; 8]);
        env.auth.as_mut().unwrap().mac.pop();
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::MalformedMac)
        );

        let mut env = signed(&signer, 5_000, &[4; 8]);
        env.auth.as_mut().unwrap().nonce = "zz".to_string();
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::MalformedNonce)
        );

        let mut env = signed(&signer, 5_000, &[4; 8]);
        env.auth.as_mut().unwrap().nonce = "00".repeat(17);
        assert_eq!(
            verifier.validate_detailed(&env),
            Err(CommandRejection::MalformedNonce)
        );
    }

    #[test]
    fn test_timestamp_window() {
        let (signer, mut verifier) = pair();
        assert!(verifier.validate(&signed(&signer, 100_000, &[1])));
        assert_eq!(verifier.latest_timestamp_ms(), 100_000);

        // within the window behind the watermark
        assert!(verifier.validate(&signed(&signer, 40_000, &[2])));
        assert_eq!(verifier.latest_timestamp_ms(), 100_000);

        assert_eq!(
            verifier.validate_detailed(&signed(&signer, 39_999, &[3])),
            Err(CommandRejection::StaleTimestamp)
        );

        assert!(verifier.validate(&signed(&signer, 200_000, &[4])));
        assert_eq!(verifier.latest_timestamp_ms(), 200_000);
    }

    #[test]
    fn test_forged_fresh_timestamp_advances_watermark() {
        let (signer, mut verifier) = pair();
        assert!(verifier.validate(&signed(&signer, 100_000, &[1])));

        let mut forged = signed(&signer, 500_000, &[9]);
        forged.auth.as_mut().unwrap().mac = "0".repeat(MAC_HEX_LEN);
        assert!(!verifier.validate(&forged));
        assert_eq!(verifier.latest_timestamp_ms(), 500_000);

        assert_eq!(
            verifier.validate_detailed(&signed(&signer, 100_001, &[2])),
            Err(CommandRejection::StaleTimestamp)
        );
    }

    #[test]
    fn test_history_eviction_at_depth() {
        let (signer, mut verifier) = pair();
        let original = signed(&signer, 1_000, &[0xee; 8]);
        assert!(verifier.validate(&original));

        for i in 0..(NONCE_HISTORY_DEPTH - 1) as u8 {
            assert!(verifier.validate(&signed(&signer, 2_000 + i as u64, &[i; 8])));
        }
        // history full, original still present
        assert_eq!(verifier.history().len(), NONCE_HISTORY_DEPTH);
        assert!(!verifier.validate(&original));

        // one more distinct nonce evicts the oldest entry, which is the original
        assert!(verifier.validate(&signed(&signer, 3_000, &[0x77; 8])));
        assert!(!verifier.history().contains(&[0xee; 8]));
        assert!(verifier.validate(&original));
    }

    #[test]
    fn test_set_key_rejects_wrong_length() {
        let mut auth = CommandAuthenticator::new();
        assert!(auth.set_key(&[1u8; 31]).is_err());
        assert!(auth.set_key(&[1u8; 33]).is_err());
        assert!(!auth.has_key());
    }

    #[test]
    fn test_forget_key_resets_state() {
        let (signer, mut verifier) = pair();
        assert!(verifier.validate(&signed(&signer, 1_000, &[1])));
        verifier.forget_key();
        assert!(!verifier.has_key());
        assert!(verifier.history().is_empty());
        assert_eq!(verifier.latest_timestamp_ms(), 0);
        assert!(!verifier.validate(&signed(&signer, 1_000, &[1])));
    }

    #[test]
    fn test_reset_history_keeps_key() {
        let (signer, mut verifier) = pair();
        let env = signed(&signer, 1_000, &[1]);
        assert!(verifier.validate(&env));
        verifier.reset_history();
        assert!(verifier.has_key());
        assert!(verifier.validate(&env));
    }

    #[test]
    fn test_init_from_store() {
        let mut store = MemorySecretStore::new();
        store.put("cmd_key", &KEY).unwrap();
        store.put("short_key", &KEY[..16]).unwrap();

        let mut auth = CommandAuthenticator::new();
        auth.init_from_store(&store, "cmd_key").unwrap();
        assert!(auth.has_key());

        assert!(matches!(
            auth.init_from_store(&store, "missing"),
            Err(SecurityError::KeyStore(_))
        ));
        assert!(!auth.has_key());

        assert!(matches!(
            auth.init_from_store(&store, "short_key"),
            Err(SecurityError::Configuration { .. })
        ));
        assert!(!auth.has_key());
    }

    #[test]
    fn test_sign_envelope_random_nonce() {
        let (signer, mut verifier) = pair();
        let mut rng = StdRng::seed_from_u64(11);
        let auth = signer
            .sign_envelope(&payload(), PROTOCOL_VERSION, 1_000, &mut rng)
            .unwrap();
        assert_eq!(auth.nonce.len(), DEFAULT_SIGNING_NONCE_LEN * 2);
        assert_eq!(auth.alg.as_deref(), Some(MAC_ALG));
        assert!(verifier.validate(&envelope(1_000, payload(), Some(auth))));
    }

    #[test]
    fn test_sign_requires_key() {
        let auth = CommandAuthenticator::new();
        assert!(auth
            .sign_envelope_with_nonce(&payload(), 1, 1, &[1])
            .is_err());
    }

    #[test]
    fn test_nonce_history_prefers_empty_slot() {
        let mut history = NonceHistory::default();
        history.record(&[1], 500);
        history.record(&[2], 100);
        assert_eq!(history.len(), 2);
        for i in 3..=8u8 {
            history.record(&[i], 1_000 + i as u64);
        }
        assert_eq!(history.len(), NONCE_HISTORY_DEPTH);
        history.record(&[9], 2_000);
        assert!(!history.contains(&[2]));
        assert!(history.contains(&[1]));
        assert!(history.contains(&[9]));
    }

    #[test]
    fn test_nonce_length_is_part_of_identity() {
        let mut history = NonceHistory::default();
        history.record(&[0, 0], 1);
        assert!(history.contains(&[0, 0]));
        assert!(!history.contains(&[0]));
        assert!(!history.contains(&[0, 0, 0]));
    }
}
