use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;

use crate::{Error, Result};

// The NF-PBKDF2-V1 scheme: PBKDF2 with HMAC-SHA512, a random salt, and the
// scheme name prefixed so other schemes can be added later. The stored form
// is the name followed by base64(salt || derived key).
const SCHEME_NAME: &str = "{NF-PBKDF2-V1}";
const SALT_LENGTH: usize = 32;
const KEY_LENGTH: usize = 128;
const PBKDF_ROUNDS: u32 = 10_000;

fn compute_hash(password: &str, salt: &[u8]) -> String {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, PBKDF_ROUNDS, &mut key);

    let mut raw = Vec::with_capacity(SALT_LENGTH + KEY_LENGTH);
    raw.extend_from_slice(salt);
    raw.extend_from_slice(&key);
    format!("{SCHEME_NAME}{}", BASE64.encode(raw))
}

/// Hashes a plaintext password under a fresh random salt.
pub fn hash(password: &str) -> String {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    compute_hash(password, &salt)
}

/// Verifies a candidate password against a stored hash. A stored value with
/// an unknown scheme or a malformed payload is an error, not a mismatch.
pub fn check(password: &str, stored: &str) -> Result<bool> {
    let encoded = stored.strip_prefix(SCHEME_NAME).ok_or_else(|| {
        Error::Other("hashed password has invalid scheme".to_string())
    })?;
    let decoded = BASE64
        .decode(encoded)
        .map_err(|e| Error::Other(format!("hashed password is not valid base64: {e}")))?;
    if decoded.len() != SALT_LENGTH + KEY_LENGTH {
        return Err(Error::Other("hashed password has invalid length".to_string()));
    }

    let candidate = compute_hash(password, &decoded[..SALT_LENGTH]);
    if candidate.len() != stored.len() {
        return Ok(false);
    }

    let mut diff = 0u8;
    for (a, b) in candidate.bytes().zip(stored.bytes()) {
        diff |= a ^ b;
    }
    Ok(diff == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_then_check() {
        let stored = hash("test123");
        assert!(stored.starts_with(SCHEME_NAME));
        assert!(check("test123", &stored).unwrap());
        assert!(!check("wrong", &stored).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        assert_ne!(hash("test123"), hash("test123"));
    }

    #[test]
    fn test_unknown_scheme_is_an_error() {
        assert!(check("test123", "test123").is_err());
        assert!(check("test123", "{SSHA}c2FsdHNhbHQ=").is_err());
    }

    #[test]
    fn test_malformed_payload_is_an_error() {
        assert!(check("test123", "{NF-PBKDF2-V1}!!!not-base64!!!").is_err());

        let short = format!("{SCHEME_NAME}{}", BASE64.encode(b"too short"));
        assert!(check("test123", &short).is_err());
    }
}
