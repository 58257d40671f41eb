//! Result ingestion: signature verification, NO_CHANGE validation,
//! persistence, job finalization, and follow-up refresh scheduling.
//!
//! A refused completion never persists a result and never advances the
//! job except to rewind it for retry. This proves only that the result
//! came from the agent that last claimed the job - not that the tool
//! logic was honest.

use chrono::{Duration, Utc};
use obscura_db::{AgentRow, DbError, JobRow, NewJob, NewResult};
use obscura_protocol::{
    canonical_json_of, CompleteRequest, CompleteResponse, Guid, JobStatus, OfflineUploadRequest,
    ResultStatus,
};
use obscura_security::{ResultSigner, SigningError};
use tracing::{info, warn};

use crate::{ApiError, AppState};

/// Ingest an inline or chunk-assembled completion for a claimed job.
pub async fn ingest_completion(
    state: &AppState,
    agent: &AgentRow,
    job_guid: Guid,
    req: &CompleteRequest,
) -> Result<CompleteResponse, ApiError> {
    if !agent.is_verified {
        return Err(ApiError::forbidden(
            "agent binary is not verified against the release manifest",
        ));
    }

    let job = state
        .queue
        .get(job_guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {job_guid}")))?;

    // Another agent posting for a job not assigned to it: refuse, no
    // state change.
    if job.assigned_agent_guid.as_deref() != Some(agent.guid.as_str()) {
        return Err(ApiError::conflict("job is not assigned to this agent"));
    }
    let status = job.status().map_err(ApiError::from)?;
    if !matches!(status, JobStatus::Assigned | JobStatus::Running) {
        return Err(ApiError::conflict(format!(
            "job is {status}, not accepting completion"
        )));
    }

    // Re-derive the plaintext secret. Lost plaintext (server restart)
    // refuses the result and rewinds the job for one retry.
    let Some(secret_b64) = state.secrets.take(job_guid) else {
        warn!("Signing secret for job {} unavailable; rewinding", job_guid);
        state
            .queue
            .fail_or_retry(job_guid, "signing secret unavailable at completion")
            .await?;
        return Err(ApiError::conflict(
            "signing secret unavailable; job requeued",
        ));
    };

    let canonical = canonical_json_of(&req.result)
        .map_err(|_| ApiError::bad_request("result payload is not serializable"))?;
    let signer = ResultSigner::from_b64(&secret_b64)
        .map_err(|_| ApiError::bad_request("malformed signing secret"))?;
    match signer.verify(&canonical, &req.signature) {
        Ok(()) => {}
        Err(SigningError::Mismatch) | Err(SigningError::InvalidSignature) => {
            warn!("Signature mismatch on job {}; rewinding", job_guid);
            state
                .queue
                .fail_or_retry(job_guid, "completion signature mismatch")
                .await?;
            return Err(ApiError::unauthorized("invalid result signature"));
        }
        Err(err) => {
            return Err(ApiError::bad_request(err.to_string()));
        }
    }

    persist_outcome(state, &job, req).await
}

async fn persist_outcome(
    state: &AppState,
    job: &JobRow,
    req: &CompleteRequest,
) -> Result<CompleteResponse, ApiError> {
    let job_guid: Guid = job
        .guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed job guid"))?;
    let team_guid: Guid = job
        .team_guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed team guid"))?;
    let collection_guid = job
        .collection_guid
        .as_deref()
        .and_then(|g| g.parse().ok());
    let tool = job.tool().map_err(ApiError::from)?;
    let payload = &req.result;

    match payload.status {
        ResultStatus::NoChange => {
            if !payload.no_change_copy {
                return Err(ApiError::conflict(
                    "NO_CHANGE completion must set no_change_copy",
                ));
            }
            let reference = payload
                .download_report_from
                .ok_or_else(|| ApiError::conflict("NO_CHANGE completion needs a reference"))?;
            let row = state
                .results
                .insert_no_change(
                    team_guid,
                    collection_guid,
                    tool,
                    reference,
                    payload.started_at,
                    payload.completed_at,
                )
                .await?;
            state.queue.mark_completed(job_guid, parse_guid(&row.guid)?).await?;
            schedule_refresh(state, job, team_guid).await;
            Ok(CompleteResponse {
                result_guid: parse_guid(&row.guid)?,
            })
        }
        ResultStatus::Completed => {
            let row = state.results.insert(new_result(job, payload, team_guid)?).await?;
            state.queue.mark_completed(job_guid, parse_guid(&row.guid)?).await?;
            record_accessibility(state, job, collection_guid, payload).await;
            schedule_refresh(state, job, team_guid).await;
            Ok(CompleteResponse {
                result_guid: parse_guid(&row.guid)?,
            })
        }
        ResultStatus::Cancelled => {
            let row = state.results.insert(new_result(job, payload, team_guid)?).await?;
            state.queue.mark_cancelled(job_guid).await?;
            Ok(CompleteResponse {
                result_guid: parse_guid(&row.guid)?,
            })
        }
        ResultStatus::Failed => {
            let error = payload
                .error_message
                .clone()
                .unwrap_or_else(|| "tool execution failed".into());
            let row = state.results.insert(new_result(job, payload, team_guid)?).await?;
            let next = state.queue.fail_or_retry(job_guid, &error).await?;
            info!("Job {} failed completion ingested; now {}", job_guid, next);
            Ok(CompleteResponse {
                result_guid: parse_guid(&row.guid)?,
            })
        }
    }
}

/// Ingest an offline-executed result synced after the fact. Idempotent on
/// the agent-side result id so a retried sync never duplicates.
pub async fn ingest_offline(
    state: &AppState,
    agent: &AgentRow,
    req: &OfflineUploadRequest,
) -> Result<CompleteResponse, ApiError> {
    if !agent.is_verified {
        return Err(ApiError::forbidden(
            "agent binary is not verified against the release manifest",
        ));
    }
    let payload = &req.result;
    if payload.result.status == ResultStatus::NoChange {
        return Err(ApiError::conflict(
            "offline results cannot be NO_CHANGE copies",
        ));
    }

    if let Some(existing) = state.results.get(payload.result_id).await? {
        return Ok(CompleteResponse {
            result_guid: parse_guid(&existing.guid)?,
        });
    }

    let team_guid: Guid = agent
        .team_guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed team guid"))?;
    let row = state
        .results
        .insert_with_guid(
            payload.result_id,
            NewResult {
                team_guid,
                collection_guid: payload.collection_guid,
                connector_guid: None,
                pipeline_guid: None,
                pipeline_version: None,
                tool: payload.tool,
                status: payload.result.status,
                started_at: payload.result.started_at,
                completed_at: payload.result.completed_at,
                duration_seconds: payload.result.duration_seconds,
                results: payload.result.results.clone(),
                report_html: payload.result.report_html.clone(),
                input_state_hash: payload.result.input_state_hash.clone(),
            },
        )
        .await?;

    info!(
        "Ingested offline result {} from agent {}",
        row.guid, agent.guid
    );
    Ok(CompleteResponse {
        result_guid: parse_guid(&row.guid)?,
    })
}

fn new_result(job: &JobRow, payload: &obscura_protocol::ResultPayload, team_guid: Guid) -> Result<NewResult, ApiError> {
    Ok(NewResult {
        team_guid,
        collection_guid: job.collection_guid.as_deref().and_then(|g| g.parse().ok()),
        connector_guid: None,
        pipeline_guid: job.pipeline_guid.as_deref().and_then(|g| g.parse().ok()),
        pipeline_version: job.pipeline_version,
        tool: job.tool().map_err(ApiError::from)?,
        status: payload.status,
        started_at: payload.started_at,
        completed_at: payload.completed_at,
        duration_seconds: payload.duration_seconds,
        results: payload.results.clone(),
        report_html: payload.report_html.clone(),
        input_state_hash: payload.input_state_hash.clone(),
    })
}

/// A completed collection test resolves the collection's accessibility
/// tri-state. Best-effort: a missing flag leaves the pending state.
async fn record_accessibility(
    state: &AppState,
    job: &JobRow,
    collection_guid: Option<Guid>,
    payload: &obscura_protocol::ResultPayload,
) {
    if job.tool().ok() != Some(obscura_protocol::ToolKind::CollectionTest) {
        return;
    }
    let Some(collection_guid) = collection_guid else {
        return;
    };
    let Some(accessible) = payload.results.get("accessible").and_then(|v| v.as_bool()) else {
        return;
    };
    if let Err(err) = state.catalog.set_accessibility(collection_guid, accessible).await {
        warn!("Failed to record collection accessibility: {}", err);
    }
}

/// Auto-refresh jobs re-enqueue themselves: a completed refresh schedules
/// the next identical run. A scheduled job already on the books for this
/// (collection, tool) makes this a no-op.
async fn schedule_refresh(state: &AppState, job: &JobRow, team_guid: Guid) {
    if job.mode.as_deref() != Some("auto_refresh") {
        return;
    }
    let Some(collection_guid) = job.collection_guid.as_deref().and_then(|g| g.parse().ok())
    else {
        return;
    };
    let Ok(tool) = job.tool() else {
        return;
    };

    let interval_days = match state.config.auto_refresh_interval_days(team_guid).await {
        Ok(days) => days,
        Err(err) => {
            warn!("Failed to read refresh interval: {}", err);
            return;
        }
    };

    let mut next = NewJob::immediate(team_guid, tool)
        .for_collection(collection_guid)
        .with_priority(job.priority)
        .scheduled_at(Utc::now() + Duration::days(interval_days));
    next.mode = Some("auto_refresh".into());
    next.bound_agent_guid = job.bound_agent_guid.as_deref().and_then(|g| g.parse().ok());
    next.required_capabilities = job.required_capabilities();
    next.pipeline_guid = job.pipeline_guid.as_deref().and_then(|g| g.parse().ok());
    next.pipeline_version = job.pipeline_version;
    next.parent_job_guid = job.guid.parse().ok();

    match state.queue.enqueue(next).await {
        Ok(scheduled) => info!(
            "Scheduled follow-up refresh {} for collection {}",
            scheduled.guid, collection_guid
        ),
        Err(DbError::Constraint(_)) => {}
        Err(err) => warn!("Failed to schedule follow-up refresh: {}", err),
    }
}

fn parse_guid(raw: &str) -> Result<Guid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::conflict(format!("malformed guid {raw}")))
}
