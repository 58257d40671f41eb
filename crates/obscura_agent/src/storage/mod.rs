//! Storage adapters: one interface over every place a collection lives.
//!
//! `LocalAdapter` walks the filesystem; `ManifestAdapter` serves a bucket
//! manifest (inventory imports); the cloud backends ship as clean-failing
//! stubs - their SDK wrappers are external collaborators, and
//! `test_connection` reports their absence instead of panicking.

pub mod local;
pub mod manifest;

use obscura_protocol::{CollectionType, FileInfo};
use thiserror::Error;

pub use local::LocalAdapter;
pub use manifest::ManifestAdapter;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path does not exist: {0}")]
    NotFound(String),

    #[error("path is not a directory: {0}")]
    NotADirectory(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} storage backend is not built into this agent")]
    Unsupported(CollectionType),

    #[error("malformed manifest: {0}")]
    Manifest(String),
}

/// Common interface for listing a collection's files.
pub trait StorageAdapter: Send + Sync {
    /// All file paths relative to the location.
    fn list_files(&self, location: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .list_files_with_metadata(location)?
            .into_iter()
            .map(|f| f.path)
            .collect())
    }

    /// All files with size and modification time.
    fn list_files_with_metadata(&self, location: &str) -> Result<Vec<FileInfo>, StorageError>;

    /// Validate connectivity/credentials without listing anything.
    fn test_connection(&self) -> (bool, String);
}

/// A cloud backend this build does not carry. Everything fails cleanly.
pub struct UnsupportedAdapter {
    kind: CollectionType,
}

impl UnsupportedAdapter {
    pub fn new(kind: CollectionType) -> Self {
        Self { kind }
    }
}

impl StorageAdapter for UnsupportedAdapter {
    fn list_files_with_metadata(&self, _location: &str) -> Result<Vec<FileInfo>, StorageError> {
        Err(StorageError::Unsupported(self.kind))
    }

    fn test_connection(&self) -> (bool, String) {
        (
            false,
            format!("{} storage backend is not built into this agent", self.kind),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_adapter_fails_cleanly() {
        let adapter = UnsupportedAdapter::new(CollectionType::S3);
        let (ok, message) = adapter.test_connection();
        assert!(!ok);
        assert!(message.contains("s3"));
        assert!(matches!(
            adapter.list_files("bucket/prefix"),
            Err(StorageError::Unsupported(CollectionType::S3))
        ));
    }
}
