//! Cached heartbeat verdict for outdated-agent warnings.
//!
//! The CLI gates its "you are outdated" banner on this 1 hour cache so a
//! warning never costs a server round-trip.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::debug;

use obscura_protocol::defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionState {
    pub is_outdated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub cached_at: DateTime<Utc>,
}

pub struct VersionCacheStore {
    file: PathBuf,
}

impl VersionCacheStore {
    pub fn new(file: PathBuf) -> Self {
        Self { file }
    }

    pub fn write(&self, is_outdated: bool, latest_version: Option<String>) -> io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let state = VersionState {
            is_outdated,
            latest_version,
            cached_at: Utc::now(),
        };
        let raw = serde_json::to_string(&state)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        fs::write(&self.file, raw)
    }

    /// The cached verdict, or `None` when missing, corrupt, or older than
    /// an hour.
    pub fn read(&self) -> Option<VersionState> {
        let raw = fs::read_to_string(&self.file).ok()?;
        let state: VersionState = serde_json::from_str(&raw).ok()?;
        let age = Utc::now() - state.cached_at;
        if age > Duration::seconds(defaults::VERSION_CACHE_TTL_SECS as i64) {
            debug!("Version cache expired");
            return None;
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = VersionCacheStore::new(dir.path().join("version-state.json"));

        assert!(store.read().is_none());
        store.write(true, Some("v1.3.0".into())).unwrap();

        let state = store.read().unwrap();
        assert!(state.is_outdated);
        assert_eq!(state.latest_version.as_deref(), Some("v1.3.0"));
    }

    #[test]
    fn test_expired_verdict_ignored() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("version-state.json");
        let store = VersionCacheStore::new(file.clone());

        let stale = VersionState {
            is_outdated: true,
            latest_version: None,
            cached_at: Utc::now() - Duration::hours(2),
        };
        fs::write(&file, serde_json::to_string(&stale).unwrap()).unwrap();
        assert!(store.read().is_none());
    }
}
