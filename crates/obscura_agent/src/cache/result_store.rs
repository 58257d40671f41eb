//! Offline result spool: one encrypted file per unsent result.
//!
//! Results are sealed with the shared master key and have no TTL - they
//! persist until synced and cleaned. Plaintext reads are attempted as a
//! fallback for spools written before encryption landed.

use obscura_protocol::Guid;
use obscura_security::MasterKey;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::OfflineResult;

pub struct OfflineResultStore {
    dir: PathBuf,
    key: MasterKey,
}

impl OfflineResultStore {
    pub fn new(dir: PathBuf, key: MasterKey) -> Self {
        Self { dir, key }
    }

    fn result_file(&self, result_id: Guid) -> PathBuf {
        self.dir.join(format!("{result_id}.json"))
    }

    pub fn save(&self, result: &OfflineResult) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let file = self.result_file(result.result_id);
        let raw = serde_json::to_vec_pretty(result)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let sealed = self
            .key
            .seal(&raw)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        fs::write(&file, sealed)?;
        debug!(
            "Saved offline result {} (tool={}, collection={:?})",
            result.result_id, result.tool, result.collection_guid
        );
        Ok(file)
    }

    pub fn load(&self, result_id: Guid) -> Option<OfflineResult> {
        let file = self.result_file(result_id);
        let bytes = fs::read(&file).ok()?;

        if let Ok(plaintext) = self.key.open(&bytes) {
            match serde_json::from_slice(&plaintext) {
                Ok(result) => return Some(result),
                Err(err) => {
                    warn!("Failed to parse offline result {}: {}", result_id, err);
                    return None;
                }
            }
        }

        // Pre-encryption spools stored plaintext JSON.
        match serde_json::from_slice(&bytes) {
            Ok(result) => Some(result),
            Err(_) => {
                warn!("Failed to decrypt offline result {}", result_id);
                None
            }
        }
    }

    /// Every readable result on disk, pending or synced.
    pub fn list_all(&self) -> Vec<OfflineResult> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        let mut files: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
        files.sort();
        for file in files {
            let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(result_id) = stem.parse::<Guid>() else {
                continue;
            };
            match self.load(result_id) {
                Some(result) => results.push(result),
                None => warn!("Skipping unreadable result file {}", file.display()),
            }
        }
        results
    }

    /// Results still awaiting upload.
    pub fn list_pending(&self) -> Vec<OfflineResult> {
        self.list_all().into_iter().filter(|r| !r.synced).collect()
    }

    /// Flip the synced flag after the server accepted an upload.
    pub fn mark_synced(&self, result_id: Guid) -> io::Result<bool> {
        let Some(mut result) = self.load(result_id) else {
            return Ok(false);
        };
        result.synced = true;
        self.save(&result)?;
        debug!("Marked result {} as synced", result_id);
        Ok(true)
    }

    pub fn delete(&self, result_id: Guid) -> io::Result<bool> {
        let file = self.result_file(result_id);
        if file.exists() {
            fs::remove_file(file)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete all synced result files. Returns how many went.
    pub fn cleanup_synced(&self) -> u64 {
        let mut removed = 0;
        for result in self.list_all() {
            if result.synced && self.delete(result.result_id).unwrap_or(false) {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obscura_protocol::{ResultPayload, ResultStatus, ToolKind};
    use tempfile::TempDir;

    fn payload() -> ResultPayload {
        ResultPayload {
            status: ResultStatus::Completed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 1.0,
            results: serde_json::json!({"total_files": 3}),
            report_html: None,
            input_state_hash: None,
            no_change_copy: false,
            download_report_from: None,
            error_message: None,
        }
    }

    fn store(dir: &TempDir) -> OfflineResultStore {
        let key = MasterKey::load_or_generate(&dir.path().join("master.key")).unwrap();
        OfflineResultStore::new(dir.path().join("results"), key)
    }

    #[test]
    fn test_spool_is_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = OfflineResult::new(Some(Guid::new()), ToolKind::Photostats, payload());

        let file = store.save(&result).unwrap();
        let on_disk = fs::read(&file).unwrap();
        assert!(!on_disk.windows(11).any(|w| w == b"total_files"));

        let loaded = store.load(result.result_id).unwrap();
        assert_eq!(loaded.result_id, result.result_id);
        assert!(!loaded.synced);
    }

    #[test]
    fn test_plaintext_fallback() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = OfflineResult::new(None, ToolKind::Photostats, payload());

        fs::create_dir_all(dir.path().join("results")).unwrap();
        fs::write(
            dir.path().join(format!("results/{}.json", result.result_id)),
            serde_json::to_vec(&result).unwrap(),
        )
        .unwrap();

        assert!(store.load(result.result_id).is_some());
    }

    #[test]
    fn test_sync_lifecycle() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let result = OfflineResult::new(None, ToolKind::Photostats, payload());
        store.save(&result).unwrap();

        assert_eq!(store.list_pending().len(), 1);
        assert!(store.mark_synced(result.result_id).unwrap());
        assert!(store.list_pending().is_empty());

        assert_eq!(store.cleanup_synced(), 1);
        assert!(store.list_all().is_empty());
        // Idempotent.
        assert_eq!(store.cleanup_synced(), 0);
    }
}
