//! Local filesystem adapter.

use chrono::{DateTime, Utc};
use obscura_protocol::FileInfo;
use std::path::Path;
use walkdir::WalkDir;

use super::{StorageAdapter, StorageError};

/// Walks a local directory, emitting one `FileInfo` per regular file.
/// Unreadable entries are skipped, not fatal.
#[derive(Default)]
pub struct LocalAdapter;

impl LocalAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl StorageAdapter for LocalAdapter {
    fn list_files_with_metadata(&self, location: &str) -> Result<Vec<FileInfo>, StorageError> {
        let root = Path::new(location);
        if !root.exists() {
            return Err(StorageError::NotFound(location.to_string()));
        }
        if !root.is_dir() {
            return Err(StorageError::NotADirectory(location.to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let last_modified = metadata
                .modified()
                .ok()
                .map(DateTime::<Utc>::from);

            // Forward slashes on every platform so fingerprints agree.
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            files.push(FileInfo::new(path, metadata.len(), last_modified));
        }
        Ok(files)
    }

    fn test_connection(&self) -> (bool, String) {
        (true, "local filesystem access available".to_string())
    }
}
