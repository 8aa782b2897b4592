//! RFC 4648 base32 decoding for TOTP secrets.

use crate::error::{Result, SecurityError};

/// Decodes a base32 string.
///
/// Accepts upper and lower case, skips whitespace and stops at the first `=`.
/// Leftover bits that are not zero are rejected.
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for c in input.chars() {
        if c.is_whitespace() {
            continue;
        }
        if c == '=' {
            break;
        }
        let value = match c {
            'A'..='Z' => c as u32 - 'A' as u32,
            'a'..='z' => c as u32 - 'a' as u32,
            '2'..='7' => c as u32 - '2' as u32 + 26,
            _ => {
                return Err(SecurityError::invalid_argument(format!(
                    "invalid base32 character {:?}",
                    c
                )))
            }
        };
        buffer = (buffer << 5) | value;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }

    if bits > 0 && buffer != 0 {
        return Err(SecurityError::invalid_argument(
            "non-zero trailing bits in base32 input",
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4648_vectors() {
        assert_eq!(decode("").unwrap(), b"");
        assert_eq!(decode("MY======").unwrap(), b"f");
        assert_eq!(decode("MZXQ====").unwrap(), b"fo");
        assert_eq!(decode("MZXW6===").unwrap(), b"foo");
        assert_eq!(decode("MZXW6YQ=").unwrap(), b"foob");
        assert_eq!(decode("MZXW6YTB").unwrap(), b"fooba");
        assert_eq!(decode("MZXW6YTBOI======").unwrap(), b"foobar");
    }

    #[test]
    fn test_totp_reference_secret() {
        assert_eq!(
            decode("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap(),
            b"12345678901234567890"
        );
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        assert_eq!(decode("mzxw 6ytb\noi").unwrap(), b"foobar");
    }

    #[test]
    fn test_invalid_character() {
        assert!(decode("MZXW1").is_err());
        assert!(decode("MZ-W").is_err());
    }

    #[test]
    fn test_nonzero_trailing_bits() {
        // "MZ" leaves two bits set after the first byte
        assert!(decode("MZ").is_err());
        assert_eq!(decode("MY").unwrap(), b"f");
    }
}
