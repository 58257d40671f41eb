//! `sync` - upload spooled offline results.
//!
//! Partial failure leaves unsent results on disk and reports per-item
//! outcomes; synced spool files are deleted afterwards.

use anyhow::{Context, Result};
use obscura_protocol::{OfflineResultPayload, OfflineUploadRequest};
use obscura_security::MasterKey;

use crate::api_client::ApiClient;
use crate::cache::OfflineResultStore;
use crate::config::{AgentConfig, AgentPaths};

pub async fn execute(paths: &AgentPaths, cleanup: bool) -> Result<i32> {
    let Some(config) = AgentConfig::load(paths)? else {
        eprintln!("Agent is not registered; nothing to sync against.");
        return Ok(1);
    };

    let master_key =
        MasterKey::load_or_generate(&paths.master_key_file()).context("load master key")?;
    let store = OfflineResultStore::new(paths.results_dir(), master_key);

    let pending = store.list_pending();
    if pending.is_empty() {
        println!("No pending results.");
        return Ok(0);
    }
    println!("Syncing {} pending result(s)...", pending.len());

    let client = ApiClient::new(&config.server_url, &config.api_key)?;
    let mut failures = 0usize;
    for result in pending {
        let request = OfflineUploadRequest {
            result: OfflineResultPayload {
                result_id: result.result_id,
                collection_guid: result.collection_guid,
                tool: result.tool,
                executed_at: result.executed_at,
                result: result.payload.clone(),
            },
        };
        match client.upload_offline(&request).await {
            Ok(response) => {
                if let Err(err) = store.mark_synced(result.result_id) {
                    eprintln!("  {} uploaded but not marked: {err}", result.result_id);
                } else {
                    println!("  {} -> {}", result.result_id, response.result_guid);
                }
            }
            Err(err) => {
                failures += 1;
                eprintln!("  {} failed: {err}", result.result_id);
            }
        }
    }

    if cleanup {
        let removed = store.cleanup_synced();
        if removed > 0 {
            println!("Removed {removed} synced spool file(s).");
        }
    }

    if failures > 0 {
        eprintln!("{failures} result(s) left pending.");
        return Ok(1);
    }
    Ok(0)
}
