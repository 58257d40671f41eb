//! Input-state hashing for NO_CHANGE dedup.
//!
//! Two runs of the same tool over the same collection hash to the same
//! value exactly when nothing that affects the tool's output changed: the
//! tool-relevant config slice, the file listing (path, size, mtime rounded
//! to seconds), and the pipeline revision if one applies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json_of;
use crate::types::{FileInfo, Guid, ToolKind};

/// One file's contribution to the input state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFingerprint {
    pub path: String,
    pub size: u64,
    /// Unix seconds; sub-second precision is deliberately dropped so
    /// filesystems with coarser mtime granularity still compare equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
}

impl From<&FileInfo> for FileFingerprint {
    fn from(info: &FileInfo) -> Self {
        Self {
            path: info.path.clone(),
            size: info.size,
            mtime: info.last_modified.map(|t| t.timestamp()),
        }
    }
}

/// The canonical tuple a dedup-eligible tool hashes before running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputState {
    pub team_guid: Guid,
    pub collection_guid: Guid,
    pub tool: ToolKind,
    /// Tool-relevant config slice: for photostats/photo_pairing the sorted,
    /// lowercased `(photo_extensions, metadata_extensions, require_sidecar)`
    /// lists; for pipeline_validation the full nodes+edges JSON.
    pub config: Value,
    /// Sorted lexicographically by path.
    pub files: Vec<FileFingerprint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_guid: Option<Guid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<i64>,
}

impl InputState {
    pub fn new(
        team_guid: Guid,
        collection_guid: Guid,
        tool: ToolKind,
        config: Value,
        files: &[FileInfo],
    ) -> Self {
        let mut fingerprints: Vec<FileFingerprint> =
            files.iter().map(FileFingerprint::from).collect();
        fingerprints.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            team_guid,
            collection_guid,
            tool,
            config,
            files: fingerprints,
            pipeline_guid: None,
            pipeline_version: None,
        }
    }

    pub fn with_pipeline(mut self, guid: Guid, version: i64) -> Self {
        self.pipeline_guid = Some(guid);
        self.pipeline_version = Some(version);
        self
    }

    /// SHA-256 hex over the canonical JSON of the whole tuple.
    pub fn hash(&self) -> String {
        // Serialization of a plain struct cannot fail.
        let canonical = canonical_json_of(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Sorted, lowercased extension-list slice used by photostats and
/// photo_pairing.
pub fn extension_config_slice(
    photo_extensions: &[String],
    metadata_extensions: &[String],
    require_sidecar: &[String],
) -> Value {
    let norm = |list: &[String]| -> Vec<String> {
        let mut out: Vec<String> = list.iter().map(|e| e.to_lowercase()).collect();
        out.sort();
        out
    };
    serde_json::json!({
        "photo_extensions": norm(photo_extensions),
        "metadata_extensions": norm(metadata_extensions),
        "require_sidecar": norm(require_sidecar),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;

    fn sample_files() -> Vec<FileInfo> {
        vec![
            FileInfo::new(
                "b/photo.xmp",
                100,
                Some(Utc.timestamp_opt(100, 500_000_000).unwrap()),
            ),
            FileInfo::new("a/photo.cr3", 1000, Some(Utc.timestamp_opt(100, 0).unwrap())),
        ]
    }

    #[test]
    fn test_hash_is_deterministic() {
        let team = Guid::new();
        let coll = Guid::new();
        let config = extension_config_slice(
            &[".CR3".into()],
            &[".xmp".into()],
            &[".cr3".into()],
        );
        let a = InputState::new(team, coll, ToolKind::Photostats, config.clone(), &sample_files());
        let b = InputState::new(team, coll, ToolKind::Photostats, config, &sample_files());
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
    }

    #[test]
    fn test_files_sorted_by_path() {
        let state = InputState::new(
            Guid::new(),
            Guid::new(),
            ToolKind::Photostats,
            Value::Null,
            &sample_files(),
        );
        assert_eq!(state.files[0].path, "a/photo.cr3");
        assert_eq!(state.files[1].path, "b/photo.xmp");
    }

    #[test]
    fn test_mtime_rounded_to_seconds() {
        let state = InputState::new(
            Guid::new(),
            Guid::new(),
            ToolKind::Photostats,
            Value::Null,
            &sample_files(),
        );
        // 100.5s and 100.0s both fingerprint as 100.
        assert_eq!(state.files[0].mtime, Some(100));
        assert_eq!(state.files[1].mtime, Some(100));
    }

    #[test]
    fn test_config_change_changes_hash() {
        let team = Guid::new();
        let coll = Guid::new();
        let files = sample_files();
        let a = InputState::new(
            team,
            coll,
            ToolKind::Photostats,
            extension_config_slice(&[".cr3".into()], &[".xmp".into()], &[]),
            &files,
        );
        let b = InputState::new(
            team,
            coll,
            ToolKind::Photostats,
            extension_config_slice(&[".cr3".into()], &[".xmp".into()], &[".cr3".into()]),
            &files,
        );
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_extension_slice_normalizes() {
        let slice = extension_config_slice(
            &[".DNG".into(), ".cr3".into()],
            &[".XMP".into()],
            &[],
        );
        assert_eq!(
            slice["photo_extensions"],
            serde_json::json!([".cr3", ".dng"])
        );
    }

    #[test]
    fn test_pipeline_revision_included() {
        let team = Guid::new();
        let coll = Guid::new();
        let pipeline = Guid::new();
        let base = InputState::new(team, coll, ToolKind::PipelineValidation, Value::Null, &[]);
        let v1 = base.clone().with_pipeline(pipeline, 1);
        let v2 = base.with_pipeline(pipeline, 2);
        assert_ne!(v1.hash(), v2.hash());
    }
}
