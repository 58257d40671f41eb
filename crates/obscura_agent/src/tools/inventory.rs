//! Inventory import: folder extraction and delta detection over a bucket
//! manifest.
//!
//! The file listing comes from the connector's stored manifest rather
//! than a live walk. Phase B derives the folder tree; phase C diffs the
//! listing against the connector's previous manifest to classify files
//! as added, removed, or modified.

use obscura_protocol::{FileInfo, ProgressUpdate};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

use super::{ToolError, ToolInput};
use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

/// Phase B: every folder implied by the listing, with per-folder counts.
pub fn extract_folders(files: &[FileInfo]) -> BTreeMap<String, u64> {
    let mut folders: BTreeMap<String, u64> = BTreeMap::new();
    for file in files {
        let mut current = file.path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            *folders.entry(parent.to_string()).or_default() += 1;
            current = parent;
        }
    }
    folders
}

/// Phase C: diff a fresh listing against the previous manifest.
///
/// A file counts as modified when its size or rounded mtime moved.
pub fn detect_delta(current: &[FileInfo], previous: &[FileInfo]) -> Value {
    let prev: BTreeMap<&str, (u64, Option<i64>)> = previous
        .iter()
        .map(|f| {
            (
                f.path.as_str(),
                (f.size, f.last_modified.map(|t| t.timestamp())),
            )
        })
        .collect();
    let current_paths: BTreeSet<&str> = current.iter().map(|f| f.path.as_str()).collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for file in current {
        match prev.get(file.path.as_str()) {
            None => added.push(file.path.clone()),
            Some((size, mtime)) => {
                let current_mtime = file.last_modified.map(|t| t.timestamp());
                if *size != file.size || *mtime != current_mtime {
                    modified.push(file.path.clone());
                }
            }
        }
    }
    let mut removed: Vec<String> = prev
        .keys()
        .filter(|path| !current_paths.contains(**path))
        .map(|path| path.to_string())
        .collect();

    added.sort();
    modified.sort();
    removed.sort();

    json!({
        "added": added,
        "modified": modified,
        "removed": removed,
        "unchanged": current.len() - added.len() - modified.len(),
    })
}

fn parse_manifest_files(manifest: &Value) -> Vec<FileInfo> {
    serde_json::from_value(manifest.clone()).unwrap_or_default()
}

pub async fn run(
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    let connector = input
        .connector
        .ok_or_else(|| ToolError::failed("inventory import requires a connector"))?;

    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate {
                stage: "importing".into(),
                total_files: Some(input.files.len() as u64),
                ..Default::default()
            })
            .await;
    }
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let folders = extract_folders(input.files);
    let previous = connector
        .inventory_manifest
        .as_ref()
        .map(parse_manifest_files)
        .unwrap_or_default();
    let delta = detect_delta(input.files, &previous);

    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    Ok(json!({
        "connector_guid": connector.guid,
        "file_count": input.files.len(),
        "folder_count": folders.len(),
        "folders": folders,
        "delta": delta,
    }))
}
