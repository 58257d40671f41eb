//! In-memory signing-secret cache.
//!
//! Plaintext signing secrets live only here, keyed by job GUID, and are
//! lost on restart - which forces one retry per in-flight job. The store
//! persists only the SHA-256 of each secret.

use obscura_protocol::Guid;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct SecretCache {
    secrets: Mutex<HashMap<Guid, String>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the plaintext secret for a freshly claimed job.
    pub fn insert(&self, job_guid: Guid, secret_b64: String) {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.insert(job_guid, secret_b64);
        }
    }

    /// Remove and return the secret for a job. Completion attempts are
    /// terminal either way (accepted, or refused and rewound), so the
    /// secret never outlives its first use.
    pub fn take(&self, job_guid: Guid) -> Option<String> {
        self.secrets.lock().ok()?.remove(&job_guid)
    }

    /// Drop a secret without using it (job cancelled or requeued).
    pub fn forget(&self, job_guid: Guid) {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.remove(&job_guid);
        }
    }
}
