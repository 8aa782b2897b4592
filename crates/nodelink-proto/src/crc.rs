//! IEEE 802.3 CRC-32 used to detect accidental corruption of envelope payloads.
//!
//! This is the reflected CRC-32 (polynomial `0xEDB88320`, init `0xFFFFFFFF`,
//! final complement). It guards against bit rot on the wire, never against a
//! malicious sender.

use tracing::debug;

/// Computes the CRC-32 of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Returns `true` when `data` hashes to `expected`.
pub fn verify(expected: u32, data: &[u8]) -> bool {
    let computed = crc32(data);
    if computed != expected {
        debug!(
            expected = format_args!("0x{:08X}", expected),
            computed = format_args!("0x{:08X}", computed),
            len = data.len(),
            "payload crc mismatch"
        );
        return false;
    }
    true
}
