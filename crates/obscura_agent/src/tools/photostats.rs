//! PhotoStats: per-extension counts and sizes plus sidecar pairing.

use obscura_protocol::{FileInfo, ProgressUpdate};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::pairing::analyze_pairing;
use super::{ToolConfig, ToolError, ToolInput};
use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

/// Calculate file counts and total sizes by extension.
///
/// Only files matching a recognized photo or metadata extension count;
/// everything else in the collection is ignored.
pub fn calculate_stats(files: &[FileInfo], config: &ToolConfig) -> Value {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut sizes: BTreeMap<String, u64> = BTreeMap::new();
    let mut total_files = 0u64;
    let mut total_size = 0u64;

    for file in files {
        let ext = file.extension();
        let recognized = config.photo_extensions.contains(&ext)
            || config.metadata_extensions.contains(&ext);
        if !recognized {
            continue;
        }
        *counts.entry(ext.clone()).or_default() += 1;
        *sizes.entry(ext).or_default() += file.size;
        total_files += 1;
        total_size += file.size;
    }

    json!({
        "file_counts": counts,
        "file_sizes": sizes,
        "total_files": total_files,
        "total_size": total_size,
    })
}

pub async fn run(
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    let total = input.files.len() as u64;
    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate {
                stage: "analyzing".into(),
                total_files: Some(total),
                ..Default::default()
            })
            .await;
    }
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let stats = calculate_stats(input.files, input.config);
    let pairing = analyze_pairing(input.files, input.config);

    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate {
                stage: "finalizing".into(),
                percentage: Some(100),
                files_scanned: Some(total),
                total_files: Some(total),
                ..Default::default()
            })
            .await;
    }

    Ok(json!({
        "stats": stats,
        "pairing": pairing,
    }))
}
