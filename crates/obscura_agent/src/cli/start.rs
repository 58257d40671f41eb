//! `start` - the agent daemon: polling loop plus heartbeat task.

use anyhow::{Context, Result};
use obscura_protocol::{defaults, exit_codes};
use obscura_security::MasterKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::cancel::ExecutionSlot;
use crate::config::{AgentConfig, AgentPaths};
use crate::credential_store::CredentialStore;
use crate::executor::JobExecutor;
use crate::heartbeat::HeartbeatTask;
use crate::polling::JobPollingLoop;

pub async fn execute(paths: &AgentPaths, poll_interval: u64) -> Result<i32> {
    let Some(config) = AgentConfig::load(paths)? else {
        eprintln!("Agent is not registered. Run `obscura-agent register` first.");
        return Ok(exit_codes::GENERIC);
    };

    let client = Arc::new(
        ApiClient::new(&config.server_url, &config.api_key)
            .context("build API client")?,
    );
    let master_key =
        MasterKey::load_or_generate(&paths.master_key_file()).context("load master key")?;
    let credentials = Arc::new(CredentialStore::new(paths.credentials_file(), master_key));
    let slot = Arc::new(ExecutionSlot::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let heartbeat = HeartbeatTask::new(
        Arc::clone(&client),
        config.agent_guid,
        paths.clone(),
        Arc::clone(&credentials),
        Arc::clone(&slot),
        Duration::from_secs(defaults::HEARTBEAT_INTERVAL_SECS),
    );
    let heartbeat_shutdown = shutdown_rx.clone();
    let heartbeat_handle =
        tokio::spawn(async move { heartbeat.run(heartbeat_shutdown).await });

    let executor = JobExecutor::new(
        Arc::clone(&client),
        config.clone(),
        Arc::clone(&credentials),
        Arc::clone(&slot),
    );
    let mut polling = JobPollingLoop::new(
        client,
        executor,
        Duration::from_secs(poll_interval.max(1)),
        shutdown_rx,
    );

    // Ctrl-C flips the shutdown flag; the loop finishes its in-flight
    // job and exits at the next wait.
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = signal_tx.send(true);
        }
    });

    let exit_code = polling.run().await;
    let _ = shutdown_tx.send(true);
    match heartbeat_handle.await {
        // Heartbeat saw a revocation while the loop was busy.
        Ok(Err(err)) => return Ok(err.exit_code()),
        Ok(Ok(())) => {}
        Err(err) => warn!("Heartbeat task panicked: {}", err),
    }
    Ok(exit_code)
}
