//! Test cache storage for local path test results.
//!
//! One JSON file per tested path at `test-cache/<sha256>.json`, keyed by
//! the SHA-256 of the normalized absolute path so any spelling of the
//! same directory hits the same entry. Entries expire after 24 hours;
//! corrupt files are purged by `cleanup()`.

use chrono::{Duration, Utc};
use obscura_protocol::defaults;
use obscura_security::sha256_hex;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::TestCacheEntry;

pub struct TestCacheStore {
    dir: PathBuf,
}

impl TestCacheStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn normalize(path: &str) -> String {
        let p = Path::new(path);
        match p.canonicalize() {
            Ok(resolved) => resolved.to_string_lossy().into_owned(),
            // Nonexistent paths still get a stable key.
            Err(_) => p.to_string_lossy().into_owned(),
        }
    }

    fn hash_path(path: &str) -> String {
        sha256_hex(Self::normalize(path).as_bytes())
    }

    fn cache_file(&self, path: &str) -> PathBuf {
        self.dir.join(format!("{}.json", Self::hash_path(path)))
    }

    /// Build a fully populated entry for a just-tested path.
    pub fn make_entry(
        &self,
        path: &str,
        accessible: bool,
        file_count: u64,
        photo_count: u64,
        sidecar_count: u64,
        tools_tested: Vec<String>,
        issues_found: Option<Value>,
        agent_id: &str,
        agent_version: &str,
    ) -> TestCacheEntry {
        let now = Utc::now();
        let normalized = Self::normalize(path);
        TestCacheEntry {
            path_hash: sha256_hex(normalized.as_bytes()),
            path: normalized,
            tested_at: now,
            expires_at: now + Duration::hours(defaults::TEST_CACHE_TTL_HOURS),
            accessible,
            file_count,
            photo_count,
            sidecar_count,
            tools_tested,
            issues_found,
            agent_id: agent_id.to_string(),
            agent_version: agent_version.to_string(),
        }
    }

    pub fn save(&self, entry: &TestCacheEntry) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let file = self.dir.join(format!("{}.json", entry.path_hash));
        let raw = serde_json::to_string_pretty(entry)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&file, raw)?;
        debug!("Saved test cache entry for {} -> {}", entry.path, file.display());
        Ok(file)
    }

    /// Load an entry regardless of age. `None` when missing or unreadable.
    pub fn load(&self, path: &str) -> Option<TestCacheEntry> {
        let file = self.cache_file(path);
        if !file.exists() {
            return None;
        }
        match fs::read_to_string(&file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Failed to parse test cache for {}: {}", path, err);
                    None
                }
            },
            Err(err) => {
                warn!("Failed to read test cache for {}: {}", path, err);
                None
            }
        }
    }

    /// Load only if unexpired; expired entries are deleted on sight.
    pub fn load_valid(&self, path: &str) -> Option<TestCacheEntry> {
        let entry = self.load(path)?;
        if !entry.is_valid() {
            debug!("Test cache expired for {}, deleting", path);
            let _ = self.delete(path);
            return None;
        }
        Some(entry)
    }

    pub fn delete(&self, path: &str) -> io::Result<bool> {
        let file = self.cache_file(path);
        if file.exists() {
            fs::remove_file(file)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Remove expired and unparseable entries. Returns how many went.
    pub fn cleanup(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return 0;
        };
        let mut removed = 0;
        for dir_entry in entries.flatten() {
            let file = dir_entry.path();
            if file.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let keep = fs::read_to_string(&file)
                .ok()
                .and_then(|raw| serde_json::from_str::<TestCacheEntry>(&raw).ok())
                .is_some_and(|entry| entry.is_valid());
            if !keep && fs::remove_file(&file).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Cleaned up {} stale test cache entries", removed);
        }
        removed
    }
}
