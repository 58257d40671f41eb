//! Built-in analysis tools.
//!
//! Every tool consumes the same inputs: the collection's `FileInfo` list,
//! a tool config slice, and optionally a pipeline graph or connector
//! context. Output is a JSON results document; report rendering beyond
//! that is out of scope here.

pub mod collection_test;
pub mod inventory;
pub mod pairing;
pub mod photostats;
pub mod pipeline;

use obscura_protocol::{ConnectorInfo, FileInfo, PipelineDef, TeamConfig, ToolKind};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::cancel::CancellationToken;
use crate::progress::ProgressReporter;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// The config slice tools read. Extensions are normalized to lowercase
/// with a leading dot at construction.
#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    pub photo_extensions: Vec<String>,
    pub metadata_extensions: Vec<String>,
    pub camera_mappings: HashMap<String, Value>,
    pub processing_methods: HashMap<String, String>,
    pub require_sidecar: Vec<String>,
}

fn normalize_extensions(list: &[String]) -> Vec<String> {
    let mut out: Vec<String> = list
        .iter()
        .map(|e| {
            let e = e.to_lowercase();
            if e.starts_with('.') {
                e
            } else {
                format!(".{e}")
            }
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

impl From<&TeamConfig> for ToolConfig {
    fn from(config: &TeamConfig) -> Self {
        Self {
            photo_extensions: normalize_extensions(&config.photo_extensions),
            metadata_extensions: normalize_extensions(&config.metadata_extensions),
            camera_mappings: config.cameras.clone(),
            processing_methods: config.processing_methods.clone(),
            require_sidecar: normalize_extensions(&config.require_sidecar),
        }
    }
}

/// Everything a tool run sees.
pub struct ToolInput<'a> {
    pub files: &'a [FileInfo],
    pub config: &'a ToolConfig,
    pub pipeline: Option<&'a PipelineDef>,
    pub connector: Option<&'a ConnectorInfo>,
    pub collection_path: Option<&'a str>,
}

/// Dispatch a tool run. Progress is advisory and optional (offline runs
/// have no reporter).
pub async fn run(
    kind: ToolKind,
    input: &ToolInput<'_>,
    progress: Option<&ProgressReporter>,
    cancel: &CancellationToken,
) -> Result<Value, ToolError> {
    match kind {
        ToolKind::Photostats => photostats::run(input, progress, cancel).await,
        ToolKind::PhotoPairing => pairing::run(input, progress, cancel).await,
        ToolKind::PipelineValidation => pipeline::run(input, progress, cancel).await,
        ToolKind::InventoryImport => inventory::run(input, progress, cancel).await,
        ToolKind::CollectionTest => collection_test::run(input, progress, cancel).await,
    }
}
