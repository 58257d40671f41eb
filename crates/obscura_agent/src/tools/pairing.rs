//! Photo pairing: images matched to their metadata sidecars.
//!
//! Files group by stem; a group with both an image and a sidecar is
//! paired. Images whose extension requires a sidecar but have none are
//! orphaned; sidecars with no image at all are orphaned the other way.

use obscura_protocol::{FileInfo, ProgressUpdate};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{ToolConfig, ToolError, ToolInput};
use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

/// Analyze image/sidecar pairing over a file listing.
pub fn analyze_pairing(files: &[FileInfo], config: &ToolConfig) -> Value {
    let mut groups: BTreeMap<String, Vec<&FileInfo>> = BTreeMap::new();
    for file in files {
        groups.entry(file.stem().to_string()).or_default().push(file);
    }

    let mut paired = Vec::new();
    let mut orphaned_images = Vec::new();
    let mut orphaned_sidecars = Vec::new();

    for (stem, group) in &groups {
        let has_image = group
            .iter()
            .any(|f| config.photo_extensions.contains(&f.extension()));
        let has_sidecar = group
            .iter()
            .any(|f| config.metadata_extensions.contains(&f.extension()));

        if has_image && has_sidecar {
            let mut paths: Vec<&str> = group.iter().map(|f| f.path.as_str()).collect();
            paths.sort();
            paired.push(json!({"base_name": stem, "files": paths}));
        } else if has_image {
            // Only images whose extension demands a sidecar are orphans.
            orphaned_images.extend(
                group
                    .iter()
                    .filter(|f| config.require_sidecar.contains(&f.extension()))
                    .map(|f| f.path.clone()),
            );
        } else if has_sidecar {
            orphaned_sidecars.extend(
                group
                    .iter()
                    .filter(|f| config.metadata_extensions.contains(&f.extension()))
                    .map(|f| f.path.clone()),
            );
        }
    }

    orphaned_images.sort();
    orphaned_sidecars.sort();

    json!({
        "paired_files": paired,
        "orphaned_images": orphaned_images,
        "orphaned_sidecars": orphaned_sidecars,
    })
}

pub async fn run(
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate {
                stage: "pairing".into(),
                total_files: Some(input.files.len() as u64),
                ..Default::default()
            })
            .await;
    }
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    Ok(analyze_pairing(input.files, input.config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ToolConfig {
        ToolConfig {
            photo_extensions: vec![".cr3".into(), ".jpg".into()],
            metadata_extensions: vec![".xmp".into()],
            require_sidecar: vec![".cr3".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_paired_file() {
        let files = vec![
            FileInfo::new("shoot/IMG_1.cr3", 1000, None),
            FileInfo::new("shoot/IMG_1.xmp", 100, None),
        ];
        let result = analyze_pairing(&files, &config());
        assert_eq!(result["paired_files"].as_array().unwrap().len(), 1);
        assert!(result["orphaned_images"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_orphaned_image_requires_sidecar_policy() {
        let files = vec![
            // Requires a sidecar, has none: orphan.
            FileInfo::new("IMG_1.cr3", 1000, None),
            // JPEGs do not require sidecars: not an orphan.
            FileInfo::new("IMG_2.jpg", 500, None),
        ];
        let result = analyze_pairing(&files, &config());
        assert_eq!(
            result["orphaned_images"],
            json!(["IMG_1.cr3"])
        );
    }

    #[test]
    fn test_orphaned_sidecar() {
        let files = vec![FileInfo::new("IMG_9.xmp", 100, None)];
        let result = analyze_pairing(&files, &config());
        assert_eq!(result["orphaned_sidecars"], json!(["IMG_9.xmp"]));
    }

    #[test]
    fn test_different_stems_do_not_pair() {
        let files = vec![
            FileInfo::new("IMG_1.cr3", 1000, None),
            FileInfo::new("IMG_2.xmp", 100, None),
        ];
        let result = analyze_pairing(&files, &config());
        assert!(result["paired_files"].as_array().unwrap().is_empty());
        assert_eq!(result["orphaned_images"], json!(["IMG_1.cr3"]));
        assert_eq!(result["orphaned_sidecars"], json!(["IMG_2.xmp"]));
    }
}
