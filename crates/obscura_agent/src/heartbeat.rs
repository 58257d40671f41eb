//! Heartbeat task: liveness, attestation, metrics, and the command pull
//! channel.
//!
//! Every 30 s the agent presents its capabilities, metrics, and
//! (version, platform, binary_checksum) attestation. The response routes
//! `cancel_job:<guid>` commands into the execution slot and refreshes
//! the cached outdated-version verdict. Heartbeats are best-effort:
//! delivery failures are logged and the task keeps going; only
//! revocation stops it.

use obscura_protocol::{parse_cancel_command, AgentError, Guid, HeartbeatRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api_client::ApiClient;
use crate::cache::VersionCacheStore;
use crate::cancel::ExecutionSlot;
use crate::capabilities;
use crate::config::AgentPaths;
use crate::credential_store::CredentialStore;
use crate::metrics;

pub struct HeartbeatTask {
    client: Arc<ApiClient>,
    agent_guid: Guid,
    credentials: Arc<CredentialStore>,
    slot: Arc<ExecutionSlot>,
    version_cache: VersionCacheStore,
    interval: Duration,
    binary_checksum: String,
}

impl HeartbeatTask {
    pub fn new(
        client: Arc<ApiClient>,
        agent_guid: Guid,
        paths: AgentPaths,
        credentials: Arc<CredentialStore>,
        slot: Arc<ExecutionSlot>,
        interval: Duration,
    ) -> Self {
        let version_cache = VersionCacheStore::new(paths.version_state_file());
        let binary_checksum = capabilities::binary_checksum().unwrap_or_default();
        Self {
            client,
            agent_guid,
            credentials,
            slot,
            version_cache,
            interval,
            binary_checksum,
        }
    }

    /// Run until shutdown. Returns early only on revocation.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.beat_once().await {
                        Ok(()) => {}
                        Err(AgentError::Revoked(message)) => {
                            return Err(AgentError::Revoked(message));
                        }
                        Err(err) => {
                            // Best-effort: a missed heartbeat only flips
                            // the server-side liveness view.
                            warn!("Heartbeat failed: {}", err);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Heartbeat task stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One heartbeat round-trip: send state, apply the response.
    pub async fn beat_once(&self) -> Result<(), AgentError> {
        let request = HeartbeatRequest {
            capabilities: capabilities::detect_capabilities(Some(&self.credentials)),
            metrics: metrics::collect(),
            version: capabilities::agent_version(),
            platform: capabilities::platform(),
            binary_checksum: self.binary_checksum.clone(),
        };

        let response = self.client.heartbeat(self.agent_guid, &request).await?;

        // Cache the verdict so CLI warnings never need a round-trip.
        if let Err(err) = self
            .version_cache
            .write(response.is_outdated, response.latest_version.clone())
        {
            debug!("Failed to cache version state: {}", err);
        }
        if response.is_outdated {
            if let Some(latest) = &response.latest_version {
                warn!(
                    "Agent is outdated: {} available (running {})",
                    latest,
                    capabilities::agent_version()
                );
            }
        }

        for command in &response.pending_commands {
            self.apply_command(command);
        }
        Ok(())
    }

    fn apply_command(&self, command: &str) {
        if let Some(job_guid) = parse_cancel_command(command) {
            if self.slot.cancel_if_current(job_guid) {
                info!("Cancelling running job {} on server request", job_guid);
            } else {
                // Cancel for a job that is not executing: a no-op.
                debug!("Ignoring cancel for job {} (not running)", job_guid);
            }
            return;
        }
        warn!("Unknown pending command: {}", command);
    }
}
