//! Cryptographically random identifier generation.
//!
//! All single-use artifacts (authorization codes, challenge IDs, device codes,
//! request URIs) carry at least 128 bits of entropy, encoded base64url without
//! padding. Signing-key IDs follow the `key-{unix-ms}-{uuid}` convention.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::time::UnixMillis;

/// Alphabet for RFC 4648 base32 user codes, without padding.
const BASE32_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generates a URL-safe random identifier with `bytes` bytes of entropy.
///
/// 16 bytes (128 bits) is the floor for any single-use artifact; 32 bytes is
/// used for bearer-grade secrets such as device codes and refresh token ids.
#[must_use]
pub fn generate_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(16)];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generates a signing-key ID: `key-{unix-ms}-{uuid}`.
#[must_use]
pub fn generate_kid() -> String {
    format!("key-{}-{}", UnixMillis::now().as_millis(), uuid::Uuid::new_v4())
}

/// Generates a 6-digit numeric one-time code, zero padded.
#[must_use]
pub fn generate_otp() -> String {
    let n = OsRng.next_u32() % 1_000_000;
    format!("{n:06}")
}

/// Generates an 8-character base32 user code with a separator: `XXXX-XXXX`.
///
/// The base32 alphabet avoids visually ambiguous `0/O` and `1/I` pairs, per
/// RFC 8628 §6.1 guidance on user-facing codes.
#[must_use]
pub fn generate_user_code() -> String {
    let mut buf = [0u8; 8];
    OsRng.fill_bytes(&mut buf);
    let chars: String = buf
        .iter()
        .map(|b| BASE32_ALPHABET[(*b as usize) % 32] as char)
        .collect();
    format!("{}-{}", &chars[..4], &chars[4..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_length_and_charset() {
        let id = generate_id(16);
        // 16 bytes -> ceil(16*8/6) = 22 base64url chars.
        assert_eq!(id.len(), 22);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_id_floors_at_128_bits() {
        let id = generate_id(4);
        assert_eq!(id.len(), 22);
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let a = generate_id(16);
        let b = generate_id(16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_kid_format() {
        let kid = generate_kid();
        assert!(kid.starts_with("key-"));
        let parts: Vec<&str> = kid.splitn(3, '-').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[1].parse::<i64>().is_ok());
        // Remainder parses as a UUID.
        assert!(uuid::Uuid::parse_str(parts[2]).is_ok());
    }

    #[test]
    fn test_generate_otp_six_digits() {
        for _ in 0..50 {
            let otp = generate_otp();
            assert_eq!(otp.len(), 6);
            assert!(otp.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_generate_user_code_format() {
        let code = generate_user_code();
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert!(
            code.chars()
                .filter(|c| *c != '-')
                .all(|c| BASE32_ALPHABET.contains(&(c as u8)))
        );
    }
}
