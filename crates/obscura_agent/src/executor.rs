//! Job executor: config fetch, storage walk, dedup precheck, tool run,
//! result signing and upload.
//!
//! A tool failure never escapes as an error - it becomes a signed FAILED
//! completion and the polling loop lives on. Progress delivery failures
//! are swallowed inside the reporter.

use chrono::Utc;
use obscura_protocol::{
    canonical_json_of, extension_config_slice, AgentError, AgentResult, ClaimedJob, CollectionType,
    CompleteRequest, FileInfo, InputState, JobConfig, ProgressUpdate, ResultPayload, ResultStatus,
    ToolKind,
};
use obscura_security::ResultSigner;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::api_client::ApiClient;
use crate::cancel::{CancellationToken, ExecutionSlot};
use crate::config::AgentConfig;
use crate::credential_store::CredentialStore;
use crate::progress::ProgressReporter;
use crate::storage::{LocalAdapter, ManifestAdapter, StorageAdapter, UnsupportedAdapter};
use crate::tools::{self, ToolConfig, ToolError, ToolInput};

pub struct JobExecutor {
    client: Arc<ApiClient>,
    agent_config: AgentConfig,
    credentials: Arc<CredentialStore>,
    slot: Arc<ExecutionSlot>,
}

impl JobExecutor {
    pub fn new(
        client: Arc<ApiClient>,
        agent_config: AgentConfig,
        credentials: Arc<CredentialStore>,
        slot: Arc<ExecutionSlot>,
    ) -> Self {
        Self {
            client,
            agent_config,
            credentials,
            slot,
        }
    }

    /// Execute a claimed job end to end and post its completion.
    pub async fn execute(&self, job: &ClaimedJob, signing_secret_b64: &str) -> AgentResult<()> {
        let cancel = self.slot.begin(job.guid);
        let started_at = Utc::now();
        let progress = ProgressReporter::new(Arc::clone(&self.client), job.guid);

        let outcome = self.run_job(job, &progress, &cancel).await;
        progress.close().await;
        self.slot.finish();

        let payload = match outcome {
            Ok(payload) => payload,
            Err(JobFailure::Cancelled) => ResultPayload {
                status: ResultStatus::Cancelled,
                started_at,
                completed_at: Utc::now(),
                duration_seconds: seconds_since(started_at),
                results: Value::Null,
                report_html: None,
                input_state_hash: None,
                no_change_copy: false,
                download_report_from: None,
                error_message: None,
            },
            Err(JobFailure::Tool(message)) => {
                warn!("Job {} tool failure: {}", job.guid, message);
                ResultPayload {
                    status: ResultStatus::Failed,
                    started_at,
                    completed_at: Utc::now(),
                    duration_seconds: seconds_since(started_at),
                    results: Value::Null,
                    report_html: None,
                    input_state_hash: None,
                    no_change_copy: false,
                    download_report_from: None,
                    error_message: Some(message),
                }
            }
            // Server communication problems bubble to the polling loop.
            Err(JobFailure::Agent(err)) => return Err(err),
        };

        self.post_signed(job, signing_secret_b64, payload).await
    }

    async fn run_job(
        &self,
        job: &ClaimedJob,
        progress: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ResultPayload, JobFailure> {
        let started_at = Utc::now();

        // Job-scoped config, cached for the job's lifetime.
        let config = self
            .client
            .job_config(job.guid)
            .await
            .map_err(JobFailure::Agent)?;
        let tool_config = ToolConfig::from(&config.config);

        progress.report(ProgressUpdate::stage("scanning")).await;
        let files = self.walk_collection(job, &config)?;
        if cancel.is_cancelled() {
            return Err(JobFailure::Cancelled);
        }

        // Dedup precheck: identical input state means the prior report is
        // reused and no analyzer runs.
        let input_state_hash = self
            .dedup_hash(job, &config, &tool_config, &files)
            .map(|state| state.hash());
        if let Some(hash) = &input_state_hash {
            let verdict = self
                .client
                .check_input_state(job.guid, hash)
                .await
                .map_err(JobFailure::Agent)?;
            if verdict.no_change {
                let reference = verdict.reference_result_guid.ok_or_else(|| {
                    JobFailure::Tool("server reported no_change without a reference".into())
                })?;
                info!("Job {} input state unchanged; reusing {}", job.guid, reference);
                return Ok(ResultPayload {
                    status: ResultStatus::NoChange,
                    started_at,
                    completed_at: Utc::now(),
                    duration_seconds: seconds_since(started_at),
                    results: Value::Null,
                    report_html: None,
                    input_state_hash: Some(hash.clone()),
                    no_change_copy: true,
                    download_report_from: Some(reference),
                    error_message: None,
                });
            }
        }

        let input = ToolInput {
            files: &files,
            config: &tool_config,
            pipeline: config.pipeline.as_ref(),
            connector: config.connector.as_ref(),
            collection_path: config.collection_path.as_deref(),
        };
        let results = tools::run(job.tool, &input, Some(progress), cancel)
            .await
            .map_err(|err| match err {
                ToolError::Cancelled => JobFailure::Cancelled,
                ToolError::Failed(message) => JobFailure::Tool(message),
            })?;

        Ok(ResultPayload {
            status: ResultStatus::Completed,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: seconds_since(started_at),
            results,
            report_html: None,
            input_state_hash,
            no_change_copy: false,
            download_report_from: None,
            error_message: None,
        })
    }

    /// One walk of the collection through the adapter for its type.
    fn walk_collection(
        &self,
        job: &ClaimedJob,
        config: &JobConfig,
    ) -> Result<Vec<FileInfo>, JobFailure> {
        let collection_type = config.collection_type.unwrap_or(CollectionType::Local);
        match collection_type {
            CollectionType::Local => {
                let path = config
                    .collection_path
                    .as_deref()
                    .ok_or_else(|| JobFailure::Tool("job has no collection path".into()))?;
                if !self.agent_config.is_authorized_path(Path::new(path)) {
                    return Err(JobFailure::Tool(format!(
                        "path {path} is outside the authorized roots"
                    )));
                }
                list_with(&LocalAdapter::new(), path)
            }
            remote => {
                // Inventory imports read the connector's manifest; other
                // remote work needs a cloud backend this build may lack.
                if job.tool == ToolKind::InventoryImport {
                    if let Some(manifest) = config
                        .connector
                        .as_ref()
                        .and_then(|c| c.inventory_manifest.as_ref())
                    {
                        let adapter = ManifestAdapter::from_manifest(manifest)
                            .map_err(|err| JobFailure::Tool(err.to_string()))?;
                        return list_with(&adapter, "");
                    }
                }
                // Agent-held credentials must exist locally before any
                // backend work is even attempted.
                if let Some(connector) = &config.connector {
                    let agent_held = connector.credential_location
                        == obscura_protocol::CredentialLocation::Agent;
                    if agent_held && self.credentials.connector(connector.guid).is_none() {
                        return Err(JobFailure::Tool(format!(
                            "no local credentials for connector {}",
                            connector.guid
                        )));
                    }
                }
                list_with(
                    &UnsupportedAdapter::new(remote),
                    config.collection_path.as_deref().unwrap_or(""),
                )
            }
        }
    }

    /// Input state for dedup-eligible tools; `None` otherwise.
    fn dedup_hash(
        &self,
        job: &ClaimedJob,
        config: &JobConfig,
        tool_config: &ToolConfig,
        files: &[FileInfo],
    ) -> Option<InputState> {
        if !job.tool.dedup_eligible() {
            return None;
        }
        let collection_guid = job.collection_guid?;

        let config_slice = match job.tool {
            ToolKind::PipelineValidation => {
                let pipeline = config.pipeline.as_ref()?;
                serde_json::json!({
                    "nodes": pipeline.nodes,
                    "edges": pipeline.edges,
                })
            }
            _ => extension_config_slice(
                &tool_config.photo_extensions,
                &tool_config.metadata_extensions,
                &tool_config.require_sidecar,
            ),
        };

        let mut state = InputState::new(
            config.team_guid,
            collection_guid,
            job.tool,
            config_slice,
            files,
        );
        if let Some(pipeline) = &config.pipeline {
            state = state.with_pipeline(
                pipeline.guid,
                job.pipeline_version.unwrap_or(pipeline.version),
            );
        }
        Some(state)
    }

    /// Sign the payload over its canonical JSON and post it, chunked when
    /// large.
    async fn post_signed(
        &self,
        job: &ClaimedJob,
        signing_secret_b64: &str,
        payload: ResultPayload,
    ) -> AgentResult<()> {
        let canonical = canonical_json_of(&payload)
            .map_err(|err| AgentError::ToolExecution(format!("unserializable result: {err}")))?;
        let signer = ResultSigner::from_b64(signing_secret_b64)
            .map_err(|err| AgentError::ToolExecution(err.to_string()))?;
        let signature = signer.sign(&canonical);

        let response = self
            .client
            .complete_job(
                job.guid,
                &CompleteRequest {
                    result: payload,
                    signature,
                },
            )
            .await?;
        info!(
            "Job {} completion accepted as result {}",
            job.guid, response.result_guid
        );
        Ok(())
    }
}

fn list_with(adapter: &dyn StorageAdapter, location: &str) -> Result<Vec<FileInfo>, JobFailure> {
    adapter
        .list_files_with_metadata(location)
        .map_err(|err| JobFailure::Tool(err.to_string()))
}

enum JobFailure {
    Cancelled,
    Tool(String),
    Agent(AgentError),
}

fn seconds_since(start: chrono::DateTime<Utc>) -> f64 {
    (Utc::now() - start).num_milliseconds() as f64 / 1000.0
}
