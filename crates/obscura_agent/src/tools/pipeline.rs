//! Pipeline validation: structural checks of the team's pipeline graph
//! against the collection's files.
//!
//! The pipeline graph doubles as configuration: its capture node anchors
//! the flow and its file-type nodes declare which extensions the team
//! recognizes. Validation checks the graph shape and reports files whose
//! extension no node claims.

use obscura_protocol::{FileInfo, PipelineDef, ProgressUpdate};
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::{ToolError, ToolInput};
use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

#[derive(Debug, Default)]
pub struct GraphReport {
    pub issues: Vec<String>,
    pub node_count: usize,
    pub edge_count: usize,
    pub declared_extensions: BTreeSet<String>,
}

/// Validate the pipeline graph structure.
///
/// Checks: unique node ids, edges referencing known nodes, exactly one
/// capture node, and every node reachable from capture.
pub fn validate_graph(pipeline: &PipelineDef) -> GraphReport {
    let mut report = GraphReport::default();

    let nodes: Vec<Value> = pipeline.nodes.as_array().cloned().unwrap_or_default();
    let edges: Vec<Value> = pipeline.edges.as_array().cloned().unwrap_or_default();
    report.node_count = nodes.len();
    report.edge_count = edges.len();

    let mut ids = HashSet::new();
    let mut capture_nodes = Vec::new();
    for node in &nodes {
        let Some(id) = node.get("id").and_then(Value::as_str) else {
            report.issues.push("node without id".into());
            continue;
        };
        if !ids.insert(id.to_string()) {
            report.issues.push(format!("duplicate node id {id}"));
        }
        let node_type = node.get("type").and_then(Value::as_str).unwrap_or("");
        if node_type == "capture" {
            capture_nodes.push(id.to_string());
        }
        if let Some(exts) = node.get("extensions").and_then(Value::as_array) {
            for ext in exts.iter().filter_map(Value::as_str) {
                report.declared_extensions.insert(ext.to_lowercase());
            }
        }
    }

    match capture_nodes.len() {
        0 => report.issues.push("no capture node".into()),
        1 => {}
        n => report.issues.push(format!("{n} capture nodes, expected 1")),
    }

    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &edges {
        let from = edge.get("from").and_then(Value::as_str);
        let to = edge.get("to").and_then(Value::as_str);
        match (from, to) {
            (Some(from), Some(to)) => {
                if !ids.contains(from) {
                    report.issues.push(format!("edge from unknown node {from}"));
                }
                if !ids.contains(to) {
                    report.issues.push(format!("edge to unknown node {to}"));
                }
                adjacency.entry(from).or_default().push(to);
            }
            _ => report.issues.push("edge missing endpoint".into()),
        }
    }

    if let Some(capture) = capture_nodes.first() {
        let mut reachable: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        reachable.insert(capture.as_str());
        queue.push_back(capture.as_str());
        while let Some(node) = queue.pop_front() {
            for next in adjacency.get(node).into_iter().flatten() {
                if reachable.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        for id in &ids {
            if !reachable.contains(id.as_str()) {
                report
                    .issues
                    .push(format!("node {id} unreachable from capture"));
            }
        }
    }

    report
}

/// Files whose extension no pipeline node declares.
pub fn unclaimed_files(files: &[FileInfo], declared: &BTreeSet<String>) -> Vec<String> {
    let mut out: Vec<String> = files
        .iter()
        .filter(|f| {
            let ext = f.extension();
            !ext.is_empty() && !declared.contains(&ext)
        })
        .map(|f| f.path.clone())
        .collect();
    out.sort();
    out
}

pub async fn run(
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    let pipeline = input
        .pipeline
        .ok_or_else(|| ToolError::failed("pipeline validation requires a pipeline"))?;

    if let Some(reporter) = progress {
        reporter
            .report(ProgressUpdate {
                stage: "validating".into(),
                message: Some(format!("pipeline {} v{}", pipeline.name, pipeline.version)),
                ..Default::default()
            })
            .await;
    }
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }

    let report = validate_graph(pipeline);
    let unclaimed = unclaimed_files(input.files, &report.declared_extensions);

    Ok(json!({
        "pipeline_guid": pipeline.guid,
        "pipeline_version": pipeline.version,
        "is_valid": report.issues.is_empty(),
        "issues": report.issues,
        "node_count": report.node_count,
        "edge_count": report.edge_count,
        "declared_extensions": report.declared_extensions,
        "unclaimed_files": unclaimed,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use obscura_protocol::Guid;

    fn pipeline(nodes: Value, edges: Value) -> PipelineDef {
        PipelineDef {
            guid: Guid::new(),
            name: "main".into(),
            version: 1,
            nodes,
            edges,
        }
    }

    #[test]
    fn test_valid_graph() {
        let p = pipeline(
            json!([
                {"id": "capture", "type": "capture"},
                {"id": "raw", "type": "file_type", "extensions": [".CR3"]},
                {"id": "meta", "type": "file_type", "extensions": [".xmp"]}
            ]),
            json!([
                {"from": "capture", "to": "raw"},
                {"from": "capture", "to": "meta"}
            ]),
        );
        let report = validate_graph(&p);
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert!(report.declared_extensions.contains(".cr3"));
    }

    #[test]
    fn test_missing_capture_and_dangling_edge() {
        let p = pipeline(
            json!([{"id": "raw", "type": "file_type"}]),
            json!([{"from": "raw", "to": "ghost"}]),
        );
        let report = validate_graph(&p);
        assert!(report.issues.iter().any(|i| i.contains("no capture node")));
        assert!(report.issues.iter().any(|i| i.contains("unknown node ghost")));
    }

    #[test]
    fn test_unreachable_node() {
        let p = pipeline(
            json!([
                {"id": "capture", "type": "capture"},
                {"id": "island", "type": "file_type"}
            ]),
            json!([]),
        );
        let report = validate_graph(&p);
        assert!(report
            .issues
            .iter()
            .any(|i| i.contains("island unreachable")));
    }

    #[tokio::test]
    async fn test_run_reports_unclaimed_files() {
        let p = pipeline(
            json!([
                {"id": "capture", "type": "capture"},
                {"id": "raw", "type": "file_type", "extensions": [".cr3"]}
            ]),
            json!([{"from": "capture", "to": "raw"}]),
        );
        let files = vec![
            FileInfo::new("a.cr3", 1, None),
            FileInfo::new("b.tiff", 1, None),
        ];
        let config = super::super::ToolConfig::default();
        let input = ToolInput {
            files: &files,
            config: &config,
            pipeline: Some(&p),
            connector: None,
            collection_path: None,
        };
        let result = run(&input, None, &CancellationToken::new()).await.unwrap();
        assert_eq!(result["is_valid"], true);
        assert_eq!(result["unclaimed_files"], json!(["b.tiff"]));
    }

    #[tokio::test]
    async fn test_run_without_pipeline_fails() {
        let config = super::super::ToolConfig::default();
        let input = ToolInput {
            files: &[],
            config: &config,
            pipeline: None,
            connector: None,
            collection_path: None,
        };
        assert!(matches!(
            run(&input, None, &CancellationToken::new()).await,
            Err(ToolError::Failed(_))
        ));
    }
}
