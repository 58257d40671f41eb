//! `run` - execute one tool locally and spool the result.
//!
//! The offline-execute -> sync-later workflow: the tool runs against the
//! resolved team config (server when reachable, cache otherwise, always
//! cache with `--offline`), and the result lands encrypted in the spool
//! for the next `sync`.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use obscura_protocol::{ResultPayload, ResultStatus, ToolKind};
use obscura_security::MasterKey;
use serde_json::Value;
use std::path::PathBuf;

use crate::cache::{OfflineResult, OfflineResultStore};
use crate::cancel::CancellationToken;
use crate::config::{AgentConfig, AgentPaths};
use crate::config_resolver::{self, ConfigSource};
use crate::storage::{LocalAdapter, StorageAdapter};
use crate::tools::{self, ToolInput};

pub async fn execute(
    paths: &AgentPaths,
    tool: String,
    path: PathBuf,
    collection: Option<String>,
    offline: bool,
) -> Result<i32> {
    let tool: ToolKind = tool
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown tool {tool}"))?;
    let collection_guid = collection
        .map(|raw| raw.parse())
        .transpose()
        .map_err(|_| anyhow::anyhow!("invalid collection guid"))?;

    let agent_config = AgentConfig::load(paths)?;
    let resolved =
        config_resolver::resolve_team_config(paths, agent_config.as_ref(), offline).await;
    println!("Team config: {}", resolved.message);
    let Some(team_config) = resolved.config else {
        bail!("no team configuration available; connect once or run `obscura-agent sync`");
    };
    if resolved.source == ConfigSource::ExpiredCache {
        eprintln!("Warning: team config cache is outdated");
    }
    let tool_config = config_resolver::tool_config_from_cache(&team_config);

    let location = path.to_string_lossy().into_owned();
    let adapter = LocalAdapter::new();
    let files = adapter
        .list_files_with_metadata(&location)
        .with_context(|| format!("walk {location}"))?;
    println!("Scanned {} files", files.len());

    let pipeline = team_config.default_pipeline.clone();
    let input = ToolInput {
        files: &files,
        config: &tool_config,
        pipeline: pipeline.as_ref(),
        connector: None,
        collection_path: Some(&location),
    };

    let started_at = Utc::now();
    let results: Value = tools::run(tool, &input, None, &CancellationToken::new())
        .await
        .map_err(|err| anyhow::anyhow!("tool failed: {err}"))?;
    let completed_at = Utc::now();

    let payload = ResultPayload {
        status: ResultStatus::Completed,
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        results,
        report_html: None,
        input_state_hash: None,
        no_change_copy: false,
        download_report_from: None,
        error_message: None,
    };

    let master_key =
        MasterKey::load_or_generate(&paths.master_key_file()).context("load master key")?;
    let store = OfflineResultStore::new(paths.results_dir(), master_key);
    let offline_result = OfflineResult::new(collection_guid, tool, payload);
    store.save(&offline_result).context("spool result")?;

    println!(
        "Result {} spooled; run `obscura-agent sync` to upload",
        offline_result.result_id
    );
    Ok(0)
}
