//! Team config cache: a single JSON file, 24 hour TTL.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

use super::TeamConfigCache;

pub struct TeamConfigCacheStore {
    file: PathBuf,
}

impl TeamConfigCacheStore {
    pub fn new(file: PathBuf) -> Self {
        Self { file }
    }

    pub fn save(&self, cache: &TeamConfigCache) -> io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(cache)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.file, raw)?;
        debug!("Saved team config cache");
        Ok(())
    }

    /// Load regardless of age.
    pub fn load(&self) -> Option<TeamConfigCache> {
        if !self.file.exists() {
            return None;
        }
        match fs::read_to_string(&self.file) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!("Failed to parse team config cache: {}", err);
                    None
                }
            },
            Err(err) => {
                warn!("Failed to read team config cache: {}", err);
                None
            }
        }
    }

    /// Load only if unexpired.
    pub fn load_valid(&self) -> Option<TeamConfigCache> {
        let cache = self.load()?;
        if cache.is_expired() {
            debug!("Team config cache expired (fetched at {})", cache.fetched_at);
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use obscura_protocol::{Guid, TeamConfig, TeamConfigResponse};
    use tempfile::TempDir;

    fn sample() -> TeamConfigCache {
        TeamConfigCache::from_response(
            Guid::new(),
            &TeamConfigResponse {
                config: TeamConfig {
                    photo_extensions: vec![".cr3".into()],
                    metadata_extensions: vec![".xmp".into()],
                    require_sidecar: vec![".cr3".into()],
                    ..Default::default()
                },
                default_pipeline: None,
            },
        )
    }

    #[test]
    fn test_round_trip_and_expiry() {
        let dir = TempDir::new().unwrap();
        let store = TeamConfigCacheStore::new(dir.path().join("team-config-cache.json"));

        store.save(&sample()).unwrap();
        assert_eq!(
            store.load_valid().unwrap().photo_extensions,
            vec![".cr3".to_string()]
        );

        let mut stale = sample();
        stale.expires_at = Utc::now() - Duration::hours(1);
        store.save(&stale).unwrap();
        assert!(store.load_valid().is_none());
        assert!(store.load().is_some());
    }
}
