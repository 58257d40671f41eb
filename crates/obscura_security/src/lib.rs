//! Obscura security module.
//!
//! Provides:
//! - **Signing**: HMAC-SHA256 result attestation and SHA-256 helpers
//! - **Keys**: opaque API key and registration token issuance
//! - **Sealed storage**: AES-256-GCM encryption behind an agent master key

pub mod keys;
pub mod sealed;
pub mod signing;

pub use keys::{hash_api_key, issue_api_key, issue_registration_token, ApiKey};
pub use sealed::{MasterKey, SealedError};
pub use signing::{hash_signing_secret, mint_signing_secret, sha256_hex, ResultSigner, SigningError};
