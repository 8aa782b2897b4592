//! RFC 6238 time-based one-time codes over HMAC-SHA-1.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::base32;
use crate::error::{Result, SecurityError};

/// Smallest accepted code length.
pub const MIN_DIGITS: u32 = 6;
/// Largest accepted code length.
pub const MAX_DIGITS: u32 = 8;
/// Default time step in seconds.
pub const DEFAULT_PERIOD_S: u64 = 30;
/// Default code length.
pub const DEFAULT_DIGITS: u32 = 6;
/// Default number of steps accepted on either side of the current one.
pub const DEFAULT_WINDOW: u32 = 1;

type HmacSha1 = Hmac<Sha1>;

/// TOTP seed. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TotpSecret(Vec<u8>);

impl TotpSecret {
    /// Wraps raw seed bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Decodes a base32 seed as handed out to authenticator apps.
    pub fn from_base32(encoded: &str) -> Result<Self> {
        Ok(Self(base32::decode(encoded)?))
    }

    /// Raw seed bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TotpSecret([REDACTED])")
    }
}

/// TOTP parameters held by a security context.
#[derive(Debug, Clone)]
pub struct TotpConfig {
    /// Seed.
    pub secret: TotpSecret,
    /// Time step in seconds.
    pub period_s: u64,
    /// Code length.
    pub digits: u32,
    /// Steps accepted on either side of the current one.
    pub window: u32,
}

impl TotpConfig {
    /// Config with default period, digits and window.
    pub fn new(secret: TotpSecret) -> Self {
        Self {
            secret,
            period_s: DEFAULT_PERIOD_S,
            digits: DEFAULT_DIGITS,
            window: DEFAULT_WINDOW,
        }
    }

    /// Checks seed, period and digit constraints.
    pub fn validate(&self) -> Result<()> {
        check_params(self.secret.as_bytes(), self.period_s, self.digits)
    }

    /// Code for `unix_time`.
    pub fn compute(&self, unix_time: u64) -> Result<u32> {
        compute(self.secret.as_bytes(), unix_time, self.period_s, self.digits)
    }

    /// Checks `code` against the window around `unix_time`.
    pub fn verify(&self, unix_time: u64, code: u32) -> Result<bool> {
        verify(
            self.secret.as_bytes(),
            unix_time,
            self.period_s,
            self.digits,
            self.window,
            code,
        )
    }
}

fn check_params(secret: &[u8], period_s: u64, digits: u32) -> Result<()> {
    if secret.is_empty() {
        return Err(SecurityError::invalid_argument("empty TOTP secret"));
    }
    if period_s == 0 {
        return Err(SecurityError::invalid_argument("TOTP period must be nonzero"));
    }
    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
        return Err(SecurityError::invalid_argument(format!(
            "TOTP digits must be {}..={}, got {}",
            MIN_DIGITS, MAX_DIGITS, digits
        )));
    }
    Ok(())
}

/// Computes the code for `unix_time`.
pub fn compute(secret: &[u8], unix_time: u64, period_s: u64, digits: u32) -> Result<u32> {
    check_params(secret, period_s, digits)?;
    let counter = unix_time / period_s;

    let mut mac = HmacSha1::new_from_slice(secret)
        .map_err(|e| SecurityError::invalid_argument(e.to_string()))?;
    mac.update(&counter.to_be_bytes());
    let hash = mac.finalize().into_bytes();

    let offset = (hash[hash.len() - 1] & 0x0f) as usize;
    let binary = ((hash[offset] as u32 & 0x7f) << 24)
        | ((hash[offset + 1] as u32) << 16)
        | ((hash[offset + 2] as u32) << 8)
        | (hash[offset + 3] as u32);
    Ok(binary % 10u32.pow(digits))
}

/// Checks `code` at `unix_time + k * period_s` for `k` in `-window..=window`.
///
/// Offsets are tried most-negative first. Times before the epoch are skipped.
pub fn verify(
    secret: &[u8],
    unix_time: u64,
    period_s: u64,
    digits: u32,
    window: u32,
    code: u32,
) -> Result<bool> {
    check_params(secret, period_s, digits)?;
    let window = window as i64;
    for step in -window..=window {
        let delta = step.unsigned_abs().saturating_mul(period_s);
        let at = if step < 0 {
            unix_time.checked_sub(delta)
        } else {
            unix_time.checked_add(delta)
        };
        let Some(at) = at else { continue };
        if compute(secret, at, period_s, digits)? == code {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Renders a code zero-padded to `digits`.
pub fn format_code(code: u32, digits: u32) -> String {
    format!("{:0width$}", code, width = digits as usize)
}
