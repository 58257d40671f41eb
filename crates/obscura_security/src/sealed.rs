//! Sealed storage: AES-256-GCM behind a file-backed master key.
//!
//! One `master.key` is shared by the agent's credential store and offline
//! result spool. It is generated on first use, written with mode 0600
//! inside a 0700 directory, and read-only afterwards. Sealed blobs carry
//! the random 12-byte nonce as a prefix.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum SealedError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("master key at {0} is malformed")]
    MalformedKey(PathBuf),

    #[error("decryption failed: wrong key or corrupted data")]
    Decrypt,

    #[error("sealed blob too short")]
    Truncated,
}

/// The agent's symmetric master key.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; KEY_LEN],
}

impl MasterKey {
    /// Load the key from `path`, generating it on first use.
    ///
    /// The containing directory is created at 0700 and the key file is
    /// written at 0600 (best-effort on non-Unix platforms).
    pub fn load_or_generate(path: &Path) -> Result<Self, SealedError> {
        if path.exists() {
            let bytes = fs::read(path)?;
            let key: [u8; KEY_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| SealedError::MalformedKey(path.to_path_buf()))?;
            return Ok(Self { key });
        }

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
            restrict_permissions(dir, 0o700);
        }

        let key_bytes = Aes256Gcm::generate_key(OsRng);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(key_bytes.as_slice());

        fs::write(path, key)?;
        restrict_permissions(path, 0o600);
        debug!("Generated master key at {}", path.display());

        Ok(Self { key })
    }

    /// Encrypt plaintext; output is `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealedError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| SealedError::Decrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `nonce || ciphertext` blob.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SealedError> {
        if sealed.len() < NONCE_LEN {
            return Err(SealedError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SealedError::Decrypt)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
        debug!("Failed to set permissions on {}: {}", path.display(), err);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_and_reload() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("agent").join("master.key");

        let first = MasterKey::load_or_generate(&key_path).unwrap();
        let second = MasterKey::load_or_generate(&key_path).unwrap();

        let sealed = first.seal(b"credentials").unwrap();
        assert_eq!(second.open(&sealed).unwrap(), b"credentials");
    }

    #[test]
    fn test_seal_open_round_trip() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::load_or_generate(&dir.path().join("master.key")).unwrap();

        let sealed = key.seal(b"{\"aws_access_key_id\":\"AKIA\"}").unwrap();
        assert_ne!(sealed, b"{\"aws_access_key_id\":\"AKIA\"}");
        assert_eq!(
            key.open(&sealed).unwrap(),
            b"{\"aws_access_key_id\":\"AKIA\"}"
        );
    }

    #[test]
    fn test_wrong_key_fails() {
        let dir = TempDir::new().unwrap();
        let a = MasterKey::load_or_generate(&dir.path().join("a.key")).unwrap();
        let b = MasterKey::load_or_generate(&dir.path().join("b.key")).unwrap();

        let sealed = a.seal(b"secret").unwrap();
        assert!(matches!(b.open(&sealed), Err(SealedError::Decrypt)));
    }

    #[test]
    fn test_truncated_blob() {
        let dir = TempDir::new().unwrap();
        let key = MasterKey::load_or_generate(&dir.path().join("master.key")).unwrap();
        assert!(matches!(key.open(&[0u8; 4]), Err(SealedError::Truncated)));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("agent").join("master.key");
        MasterKey::load_or_generate(&key_path).unwrap();

        let mode = fs::metadata(&key_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
