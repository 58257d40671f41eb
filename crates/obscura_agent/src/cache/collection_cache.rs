//! Collection cache: a single JSON file snapshotting the collections
//! bound to this agent, 7 day TTL.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::CollectionCache;

pub struct CollectionCacheStore {
    file: PathBuf,
}

impl CollectionCacheStore {
    pub fn new(file: PathBuf) -> Self {
        Self { file }
    }

    pub fn save(&self, cache: &CollectionCache) -> io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(cache)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.file, raw)?;
        debug!(
            "Saved collection cache with {} collections",
            cache.collections.len()
        );
        Ok(())
    }

    /// Load regardless of age.
    pub fn load(&self) -> Option<CollectionCache> {
        if !self.file.exists() {
            return None;
        }
        match fs::read_to_string(&self.file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!("Failed to parse collection cache: {}", err);
                    None
                }
            },
            Err(err) => {
                warn!("Failed to read collection cache: {}", err);
                None
            }
        }
    }

    /// Load only if unexpired.
    pub fn load_valid(&self) -> Option<CollectionCache> {
        let cache = self.load()?;
        if cache.is_expired() {
            debug!("Collection cache expired (synced at {})", cache.synced_at);
            return None;
        }
        Some(cache)
    }

    pub fn delete(&self) -> io::Result<bool> {
        if self.file.exists() {
            fs::remove_file(&self.file)?;
            return Ok(true);
        }
        Ok(false)
    }
}
