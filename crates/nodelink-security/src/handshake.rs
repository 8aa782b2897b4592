//! Connect-time handshake: signature, header encoding and server-side checks.
//!
//! The client proves possession of the shared secret by sending
//! `HMAC-SHA-256(handshake_key, nonce ‖ "Bearer <token>")` along with the nonce
//! and, optionally, a TOTP code. The server rejects reused nonces for a
//! bounded time window.

use std::collections::VecDeque;

use rand::{CryptoRng, RngCore};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::context::FrameCryptoContext;
use crate::error::{Result, SecurityError};
use crate::keys::hmac_sha256;
use crate::totp;

/// Handshake nonce length.
pub const WS_SECURITY_NONCE_LEN: usize = 16;
/// Handshake signature length.
pub const SIGNATURE_LEN: usize = 32;

/// Bearer token header.
pub const HEADER_AUTHORIZATION: &str = "Authorization";
/// Hex nonce header.
pub const HEADER_NONCE: &str = "X-WS-Nonce";
/// Hex signature header.
pub const HEADER_SIGNATURE: &str = "X-WS-Signature";
/// Decimal TOTP header.
pub const HEADER_TOTP: &str = "X-WS-TOTP";

const BEARER_PREFIX: &str = "Bearer ";

/// `Authorization` header value for `token`.
pub fn bearer_value(token: &str) -> String {
    format!("{}{}", BEARER_PREFIX, token)
}

/// Signs `nonce ‖ token` with the handshake key.
pub fn sign(ctx: &FrameCryptoContext, nonce: &[u8], token: &[u8]) -> Result<[u8; SIGNATURE_LEN]> {
    let key = ctx.handshake_key().ok_or(SecurityError::FeatureDisabled {
        feature: "handshake",
    })?;
    if nonce.is_empty() {
        return Err(SecurityError::invalid_argument("empty handshake nonce"));
    }
    if token.is_empty() {
        return Err(SecurityError::invalid_argument("empty handshake token"));
    }
    hmac_sha256(key.as_bytes(), &[nonce, token])
}

/// Checks a handshake signature in constant time.
pub fn verify(ctx: &FrameCryptoContext, nonce: &[u8], token: &[u8], signature: &[u8]) -> bool {
    if signature.len() != SIGNATURE_LEN {
        debug!(len = signature.len(), "handshake signature has wrong length");
        return false;
    }
    match sign(ctx, nonce, token) {
        Ok(expected) => expected[..].ct_eq(signature).into(),
        Err(e) => {
            debug!(error = %e, "handshake signature not computable");
            false
        }
    }
}

/// Handshake request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeHeaders {
    /// `Bearer <token>`.
    pub authorization: String,
    /// Hex nonce, when the handshake is signed.
    pub nonce_hex: Option<String>,
    /// Hex signature, when the handshake is signed.
    pub signature_hex: Option<String>,
    /// Zero-padded TOTP code, when TOTP is enabled.
    pub totp: Option<String>,
}

impl HandshakeHeaders {
    /// Builds the headers a client sends when connecting.
    pub fn build<R: RngCore + CryptoRng>(
        ctx: &FrameCryptoContext,
        token: &str,
        rng: &mut R,
        unix_time: u64,
    ) -> Result<Self> {
        let authorization = bearer_value(token);

        let (nonce_hex, signature_hex) = if ctx.handshake_enabled() {
            let mut nonce = [0u8; WS_SECURITY_NONCE_LEN];
            rng.fill_bytes(&mut nonce);
            let signature = sign(ctx, &nonce, authorization.as_bytes())?;
            (Some(hex::encode(nonce)), Some(hex::encode(signature)))
        } else {
            (None, None)
        };

        let totp = match ctx.totp_digits() {
            Some(digits) => Some(totp::format_code(ctx.compute_totp(unix_time)?, digits)),
            None => None,
        };

        Ok(Self {
            authorization,
            nonce_hex,
            signature_hex,
            totp,
        })
    }

    /// Header name/value pairs in a fixed order.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(HEADER_AUTHORIZATION, self.authorization.clone())];
        if let Some(nonce) = &self.nonce_hex {
            pairs.push((HEADER_NONCE, nonce.clone()));
        }
        if let Some(signature) = &self.signature_hex {
            pairs.push((HEADER_SIGNATURE, signature.clone()));
        }
        if let Some(code) = &self.totp {
            pairs.push((HEADER_TOTP, code.clone()));
        }
        pairs
    }

    /// Reads headers through `lookup`, which is called with the canonical names.
    pub fn from_lookup<'a, F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let authorization = lookup(HEADER_AUTHORIZATION)
            .ok_or_else(|| SecurityError::invalid_argument("missing Authorization header"))?
            .to_string();
        Ok(Self {
            authorization,
            nonce_hex: lookup(HEADER_NONCE).map(str::to_string),
            signature_hex: lookup(HEADER_SIGNATURE).map(str::to_string),
            totp: lookup(HEADER_TOTP).map(str::to_string),
        })
    }

    /// Reads headers from raw pairs, matching names case-insensitively.
    pub fn from_pairs<'a>(pairs: &[(&'a str, &'a str)]) -> Result<Self> {
        Self::from_lookup(|name| {
            pairs
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| *value)
        })
    }

    /// Token carried in the `Authorization` header, without the `Bearer ` prefix.
    pub fn bearer_token(&self) -> Option<&str> {
        self.authorization.strip_prefix(BEARER_PREFIX)
    }
}

/// Recently seen handshake nonces, bounded in count and age.
#[derive(Debug)]
pub struct HandshakeReplayCache {
    capacity: usize,
    window_ms: u64,
    entries: VecDeque<(Vec<u8>, u64)>,
}

impl HandshakeReplayCache {
    /// Cache holding at most `capacity` nonces for `window_ms` each.
    ///
    /// Storage grows with use; `capacity` is only an upper bound.
    pub fn new(capacity: usize, window_ms: u64) -> Self {
        Self {
            capacity: capacity.max(1),
            window_ms,
            entries: VecDeque::new(),
        }
    }

    fn purge(&mut self, now_ms: u64) {
        let window_ms = self.window_ms;
        self.entries
            .retain(|(_, seen_ms)| now_ms.saturating_sub(*seen_ms) <= window_ms);
    }

    /// Whether `nonce` was recorded within the window.
    pub fn contains(&mut self, nonce: &[u8], now_ms: u64) -> bool {
        self.purge(now_ms);
        self.entries.iter().any(|(seen, _)| seen.as_slice() == nonce)
    }

    /// Records `nonce`, evicting the oldest entry when full.
    pub fn record(&mut self, nonce: &[u8], now_ms: u64) {
        self.purge(now_ms);
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((nonce.to_vec(), now_ms));
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Server-side handshake admission.
#[derive(Debug)]
pub struct HandshakeVerifier {
    expected_token: String,
    cache: HandshakeReplayCache,
}

impl HandshakeVerifier {
    /// Verifier accepting `expected_token`.
    pub fn new(expected_token: impl Into<String>, cache_size: usize, replay_window_ms: u64) -> Self {
        Self {
            expected_token: expected_token.into(),
            cache: HandshakeReplayCache::new(cache_size, replay_window_ms),
        }
    }

    /// Checks token, signature, nonce freshness and TOTP, in that order.
    ///
    /// The nonce is recorded only when every check passed.
    pub fn verify(
        &mut self,
        ctx: &FrameCryptoContext,
        headers: &HandshakeHeaders,
        unix_time: u64,
        now_ms: u64,
    ) -> Result<()> {
        let token = headers.bearer_token().unwrap_or_default();
        let token_ok: bool = token.as_bytes().ct_eq(self.expected_token.as_bytes()).into();
        if !token_ok {
            debug!("handshake bearer token mismatch");
            return Err(SecurityError::InvalidResponse);
        }

        let mut nonce = None;
        if ctx.handshake_enabled() {
            let decoded = decode_hex_field(headers.nonce_hex.as_deref(), "nonce")?;
            let signature = decode_hex_field(headers.signature_hex.as_deref(), "signature")?;
            if decoded.len() != WS_SECURITY_NONCE_LEN {
                debug!(len = decoded.len(), "handshake nonce has wrong length");
                return Err(SecurityError::InvalidResponse);
            }
            if !verify(ctx, &decoded, headers.authorization.as_bytes(), &signature) {
                debug!("handshake signature mismatch");
                return Err(SecurityError::InvalidResponse);
            }
            if self.cache.contains(&decoded, now_ms) {
                debug!("handshake nonce replayed");
                return Err(SecurityError::InvalidResponse);
            }
            nonce = Some(decoded);
        }

        if ctx.totp_enabled() {
            let code = headers
                .totp
                .as_deref()
                .and_then(|c| c.trim().parse::<u32>().ok())
                .ok_or_else(|| {
                    debug!("handshake TOTP missing or not numeric");
                    SecurityError::InvalidResponse
                })?;
            if !ctx.verify_totp(unix_time, code)? {
                debug!("handshake TOTP mismatch");
                return Err(SecurityError::InvalidResponse);
            }
        }

        if let Some(nonce) = nonce {
            self.cache.record(&nonce, now_ms);
        }
        Ok(())
    }
}

fn decode_hex_field(value: Option<&str>, field: &'static str) -> Result<Vec<u8>> {
    let value = value.ok_or_else(|| {
        debug!(field, "handshake header missing");
        SecurityError::InvalidResponse
    })?;
    hex::decode(value).map_err(|_| {
        debug!(field, "handshake header is not hex");
        SecurityError::InvalidResponse
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SecurityConfig;
    use crate::keys::SharedSecret;
    use crate::totp::{TotpConfig, TotpSecret};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn context(totp: bool) -> FrameCryptoContext {
        FrameCryptoContext::init(&SecurityConfig {
            enable_encryption: false,
            enable_handshake: true,
            enable_totp: totp,
            secret: SharedSecret::new((0u8..32).collect()),
            totp: totp.then(|| TotpConfig::new(TotpSecret::new(b"12345678901234567890".to_vec()))),
        })
        .unwrap()
    }

    #[test]
    fn test_signature_vector() {
        let ctx = context(false);
        let nonce: Vec<u8> = (0u8..16).collect();
        let sig = sign(&ctx, &nonce, b"Bearer ExampleToken").unwrap();
        assert_eq!(
            hex::encode(sig),
            "ea785047b0566d44f54d36c4d30e8e67b3a6b3f537b45c253da8a07ca125df98"
        );
        assert!(verify(&ctx, &nonce, b"Bearer ExampleToken", &sig));
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let ctx = context(false);
        let nonce = [1u8; 16];
        let mut sig = sign(&ctx, &nonce, b"Bearer t").unwrap();
        assert!(!verify(&ctx, &nonce, b"Bearer u", &sig));
        sig[0] ^= 1;
        assert!(!verify(&ctx, &nonce, b"Bearer t", &sig));
        assert!(!verify(&ctx, &nonce, b"Bearer t", &sig[..31]));
    }

    #[test]
    fn test_sign_requires_handshake() {
        let ctx = FrameCryptoContext::disabled();
        assert!(matches!(
            sign(&ctx, &[1], b"t"),
            Err(SecurityError::FeatureDisabled { .. })
        ));
        assert!(!verify(&ctx, &[1], b"t", &[0u8; 32]));
    }

    #[test]
    fn test_sign_rejects_empty_inputs() {
        let ctx = context(false);
        assert!(sign(&ctx, &[], b"t").is_err());
        assert!(sign(&ctx, &[1], b"").is_err());
    }

    #[test]
    fn test_headers_build_and_parse() {
        let ctx = context(true);
        let mut rng = StdRng::seed_from_u64(1);
        let headers = HandshakeHeaders::build(&ctx, "ExampleToken", &mut rng, 59).unwrap();
        assert_eq!(headers.authorization, "Bearer ExampleToken");
        assert_eq!(headers.nonce_hex.as_ref().unwrap().len(), 32);
        assert_eq!(headers.totp.as_deref(), Some("287082"));

        let pairs = headers.to_pairs();
        let lowered: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect();
        let borrowed: Vec<(&str, &str)> = lowered
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(HandshakeHeaders::from_pairs(&borrowed).unwrap(), headers);
    }

    #[test]
    fn test_headers_require_authorization() {
        assert!(HandshakeHeaders::from_pairs(&[("X-WS-Nonce", "00")]).is_err());
    }

    #[test]
    fn test_verifier_accepts_then_rejects_replay() {
        let ctx = context(true);
        let mut rng = StdRng::seed_from_u64(2);
        let headers = HandshakeHeaders::build(&ctx, "tok", &mut rng, 1000).unwrap();
        let mut verifier = HandshakeVerifier::new("tok", 4, 30_000);
        verifier.verify(&ctx, &headers, 1000, 5_000).unwrap();
        assert!(matches!(
            verifier.verify(&ctx, &headers, 1000, 6_000),
            Err(SecurityError::InvalidResponse)
        ));
        // once the window has passed the nonce is forgotten
        verifier.verify(&ctx, &headers, 1000, 40_000).unwrap();
    }

    #[test]
    fn test_verifier_rejects_wrong_token() {
        let ctx = context(false);
        let mut rng = StdRng::seed_from_u64(3);
        let headers = HandshakeHeaders::build(&ctx, "tok", &mut rng, 0).unwrap();
        let mut verifier = HandshakeVerifier::new("other", 4, 30_000);
        assert!(verifier.verify(&ctx, &headers, 0, 0).is_err());
    }

    #[test]
    fn test_verifier_rejects_bad_totp_without_recording() {
        let ctx = context(true);
        let mut rng = StdRng::seed_from_u64(4);
        let mut headers = HandshakeHeaders::build(&ctx, "tok", &mut rng, 59).unwrap();
        headers.totp = Some("000000".to_string());
        let mut verifier = HandshakeVerifier::new("tok", 4, 30_000);
        assert!(verifier.verify(&ctx, &headers, 59, 0).is_err());
        headers.totp = Some("287082".to_string());
        verifier.verify(&ctx, &headers, 59, 0).unwrap();
    }

    #[test]
    fn test_verifier_rejects_tampered_signature() {
        let ctx = context(false);
        let mut rng = StdRng::seed_from_u64(5);
        let mut headers = HandshakeHeaders::build(&ctx, "tok", &mut rng, 0).unwrap();
        headers.signature_hex = Some("00".repeat(32));
        let mut verifier = HandshakeVerifier::new("tok", 4, 30_000);
        assert!(verifier.verify(&ctx, &headers, 0, 0).is_err());
        assert!(verifier.cache.is_empty());
    }

    #[test]
    fn test_replay_cache_evicts_oldest() {
        let mut cache = HandshakeReplayCache::new(2, 1_000);
        cache.record(b"a", 0);
        cache.record(b"b", 1);
        cache.record(b"c", 2);
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(b"a", 3));
        assert!(cache.contains(b"b", 3));
        assert!(cache.contains(b"c", 3));
        assert!(!cache.contains(b"c", 2_000));
    }

    #[test]
    fn test_replay_cache_huge_capacity_allocates_lazily() {
        let mut cache = HandshakeReplayCache::new(usize::MAX, 1_000);
        assert_eq!(cache.entries.capacity(), 0);
        cache.record(b"a", 0);
        assert!(cache.contains(b"a", 1));
        assert!(cache.entries.capacity() < 1024);
    }
}
