//! Collection test: accessibility plus photo/sidecar counts.
//!
//! The cheapest tool: it confirms the agent can actually see the
//! collection and reports what lives there. Results feed the local test
//! cache and the server's `is_accessible` tri-state.

use obscura_protocol::ProgressUpdate;
use serde_json::{json, Value};

use super::{ToolError, ToolInput};
use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

pub async fn run(
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate::stage("testing"))
            .await;
    }
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let config = input.config;
    let mut file_count = 0u64;
    let mut photo_count = 0u64;
    let mut sidecar_count = 0u64;

    for file in input.files {
        file_count += 1;
        let ext = file.extension();
        if config.photo_extensions.contains(&ext) {
            photo_count += 1;
        } else if config.metadata_extensions.contains(&ext) {
            sidecar_count += 1;
        }
    }

    Ok(json!({
        "accessible": true,
        "path": input.collection_path,
        "file_count": file_count,
        "photo_count": photo_count,
        "sidecar_count": sidecar_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obscura_protocol::FileInfo;

    #[tokio::test]
    async fn test_counts() {
        let files = vec![
            FileInfo::new("a.cr3", 1, None),
            FileInfo::new("a.xmp", 1, None),
            FileInfo::new("readme.md", 1, None),
        ];
        let config = super::super::ToolConfig {
            photo_extensions: vec![".cr3".into()],
            metadata_extensions: vec![".xmp".into()],
            ..Default::default()
        };
        let input = ToolInput {
            files: &files,
            config: &config,
            pipeline: None,
            connector: None,
            collection_path: Some("/photos"),
        };
        let result = run(&input, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(result["file_count"], 3);
        assert_eq!(result["photo_count"], 1);
        assert_eq!(result["sidecar_count"], 1);
        assert_eq!(result["accessible"], true);
    }
}
