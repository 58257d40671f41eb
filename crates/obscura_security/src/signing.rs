//! SHA-256 hashing and HMAC-SHA256 result attestation.
//!
//! A signing secret is minted per job claim: 32 random bytes handed to the
//! claiming agent as base64, while the server persists only the SHA-256 of
//! those bytes. The completion signature is HMAC-SHA256 over the canonical
//! JSON of the result payload; verification is constant-time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Compute the SHA-256 of data as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Mint a fresh signing secret: `(plaintext_b64, sha256_hex_of_bytes)`.
pub fn mint_signing_secret() -> (String, String) {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    (BASE64.encode(secret), sha256_hex(&secret))
}

/// Hash a base64 signing secret the way the store persists it.
pub fn hash_signing_secret(secret_b64: &str) -> Result<String, SigningError> {
    let bytes = BASE64
        .decode(secret_b64)
        .map_err(|_| SigningError::InvalidSecret)?;
    Ok(sha256_hex(&bytes))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("signing secret is not valid base64")]
    InvalidSecret,
    #[error("signature is not valid hex")]
    InvalidSignature,
    #[error("signature mismatch")]
    Mismatch,
}

/// HMAC-SHA256 signer over canonical result payloads.
#[derive(Clone)]
pub struct ResultSigner {
    secret: Vec<u8>,
}

impl ResultSigner {
    /// Build from the base64 secret delivered at claim time.
    pub fn from_b64(secret_b64: &str) -> Result<Self, SigningError> {
        let secret = BASE64
            .decode(secret_b64)
            .map_err(|_| SigningError::InvalidSecret)?;
        Ok(Self { secret })
    }

    /// Hex HMAC-SHA256 over the canonical bytes.
    pub fn sign(&self, canonical: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a hex signature.
    pub fn verify(&self, canonical: &str, signature_hex: &str) -> Result<(), SigningError> {
        let signature = hex::decode(signature_hex).map_err(|_| SigningError::InvalidSignature)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(canonical.as_bytes());
        mac.verify_slice(&signature).map_err(|_| SigningError::Mismatch)
    }
}
