//! Manifest-backed adapter for inventory imports.
//!
//! Remote buckets are not listed live during an inventory run; the
//! connector's stored manifest is the listing. The manifest is a JSON
//! array of `{path, size, last_modified?}` records.

use chrono::{DateTime, Utc};
use obscura_protocol::FileInfo;
use serde::Deserialize;
use serde_json::Value;

use super::{StorageAdapter, StorageError};

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    path: String,
    size: u64,
    #[serde(default)]
    last_modified: Option<DateTime<Utc>>,
}

pub struct ManifestAdapter {
    files: Vec<FileInfo>,
}

impl ManifestAdapter {
    /// Parse a connector manifest into an adapter.
    pub fn from_manifest(manifest: &Value) -> Result<Self, StorageError> {
        let entries: Vec<ManifestEntry> = serde_json::from_value(manifest.clone())
            .map_err(|err| StorageError::Manifest(err.to_string()))?;
        let files = entries
            .into_iter()
            .map(|e| FileInfo::new(e.path, e.size, e.last_modified))
            .collect();
        Ok(Self { files })
    }
}

impl StorageAdapter for ManifestAdapter {
    fn list_files_with_metadata(&self, _location: &str) -> Result<Vec<FileInfo>, StorageError> {
        Ok(self.files.clone())
    }

    fn test_connection(&self) -> (bool, String) {
        (true, format!("manifest with {} entries", self.files.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_manifest() {
        let manifest = json!([
            {"path": "2026/raw/IMG_0001.cr3", "size": 1000, "last_modified": "2026-07-01T10:00:00Z"},
            {"path": "2026/raw/IMG_0001.xmp", "size": 100}
        ]);
        let adapter = ManifestAdapter::from_manifest(&manifest).unwrap();
        let files = adapter.list_files_with_metadata("ignored").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "2026/raw/IMG_0001.cr3");
        assert!(files[0].last_modified.is_some());
        assert!(files[1].last_modified.is_none());
    }

    #[test]
    fn test_malformed_manifest() {
        let manifest = json!({"not": "a list"});
        assert!(matches!(
            ManifestAdapter::from_manifest(&manifest),
            Err(StorageError::Manifest(_))
        ));
    }
}
