//! Opaque API key and registration token issuance.
//!
//! Keys are random, returned to the caller exactly once; the store keeps
//! only a SHA-256 of the plaintext plus a short prefix label for display.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::signing::sha256_hex;

/// Characters of the plaintext kept as a display label.
pub const API_KEY_PREFIX_LEN: usize = 16;

/// A freshly issued API key. `plaintext` leaves the process once, in the
/// registration response; everything else persists.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub plaintext: String,
    pub hash: String,
    pub prefix: String,
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Issue an agent API key (32 random bytes, url-safe base64).
pub fn issue_api_key() -> ApiKey {
    let plaintext = format!("oak_{}", random_token(32));
    let hash = hash_api_key(&plaintext);
    let prefix = plaintext.chars().take(API_KEY_PREFIX_LEN).collect();
    ApiKey {
        plaintext,
        hash,
        prefix,
    }
}

/// Hash an API key the way the store persists it.
pub fn hash_api_key(plaintext: &str) -> String {
    sha256_hex(plaintext.as_bytes())
}

/// Issue a single-use registration token: `(plaintext, sha256_hex)`.
pub fn issue_registration_token() -> (String, String) {
    let plaintext = format!("ort_{}", random_token(24));
    let hash = sha256_hex(plaintext.as_bytes());
    (plaintext, hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_shape() {
        let key = issue_api_key();
        assert!(key.plaintext.starts_with("oak_"));
        assert_eq!(key.prefix.len(), API_KEY_PREFIX_LEN);
        assert!(key.plaintext.starts_with(&key.prefix));
        assert_eq!(key.hash, hash_api_key(&key.plaintext));
        assert_eq!(key.hash.len(), 64);
    }

    #[test]
    fn test_keys_are_unique() {
        assert_ne!(issue_api_key().plaintext, issue_api_key().plaintext);
        assert_ne!(issue_registration_token().0, issue_registration_token().0);
    }
}
