//! Job endpoints: claim, config, progress, input-state precheck,
//! completion, and offline result upload.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use obscura_db::DbError;
use obscura_protocol::{
    ClaimResponse, CompleteRequest, ConnectorInfo, Guid, InputStateRequest, InputStateResponse,
    JobConfig, OfflineUploadRequest, PipelineDef, ProgressUpdate, TeamConfig,
};
use std::sync::Arc;
use tracing::debug;

use crate::api::authenticate;
use crate::{ingest, ApiError, AppState};

/// `POST /jobs/claim` - at most one job per call, 204 when the queue has
/// nothing for this agent.
pub async fn claim(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    if !agent.is_verified {
        return Err(ApiError::forbidden(
            "agent binary is not verified against the release manifest",
        ));
    }

    let Some(outcome) = state.queue.claim(&agent).await? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    let job_guid: Guid = outcome
        .job
        .guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed job guid"))?;
    state
        .secrets
        .insert(job_guid, outcome.signing_secret_b64.clone());

    let response = ClaimResponse {
        job: outcome.job.to_claimed()?,
        signing_secret_b64: outcome.signing_secret_b64,
    };
    Ok(Json(response).into_response())
}

/// `GET /jobs/{guid}/config` - everything the executor needs for one job.
pub async fn job_config(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
) -> Result<Json<JobConfig>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let job = state
        .queue
        .get(guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {guid}")))?;
    if job.assigned_agent_guid.as_deref() != Some(agent.guid.as_str()) {
        return Err(ApiError::conflict("job is not assigned to this agent"));
    }

    let team_guid: Guid = job
        .team_guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed team guid"))?;
    let config: TeamConfig = state.config.team_config(team_guid).await?;

    let mut collection_path = None;
    let mut collection_type = None;
    let mut connector = None;
    if let Some(collection_guid) = job.collection_guid.as_deref().and_then(|g| g.parse().ok()) {
        if let Some(collection) = state.catalog.collection(collection_guid).await? {
            collection_path = Some(collection.location.clone());
            collection_type = Some(collection.collection_type()?);
            if let Some(connector_guid) =
                collection.connector_guid.as_deref().and_then(|g| g.parse().ok())
            {
                connector = connector_info(&state, connector_guid).await?;
            }
        }
    }

    let pipeline = resolve_pipeline(&state, &job, team_guid).await?;

    Ok(Json(JobConfig {
        team_guid,
        config,
        collection_path,
        collection_type,
        pipeline,
        connector,
    }))
}

async fn connector_info(
    state: &AppState,
    connector_guid: Guid,
) -> Result<Option<ConnectorInfo>, ApiError> {
    let Some(row) = state.catalog.connector(connector_guid).await? else {
        return Ok(None);
    };

    let credential_location = row.credential_location()?;
    // Server-held secrets are decrypted for delivery; agent-held ones
    // never pass through here.
    let credentials = match (&row.encrypted_credentials, credential_location) {
        (Some(sealed), obscura_protocol::CredentialLocation::Server) => {
            let plaintext = state
                .master_key
                .open(sealed)
                .map_err(|_| ApiError::conflict("stored connector credentials unreadable"))?;
            Some(
                serde_json::from_slice(&plaintext)
                    .map_err(|_| ApiError::conflict("stored connector credentials malformed"))?,
            )
        }
        _ => None,
    };

    let connector_type = row
        .connector_type
        .parse()
        .map_err(|_| ApiError::conflict("malformed connector type"))?;
    let inventory_manifest = row
        .latest_manifest_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    Ok(Some(ConnectorInfo {
        guid: connector_guid,
        connector_type,
        credential_location,
        credentials,
        inventory_manifest,
    }))
}

async fn resolve_pipeline(
    state: &AppState,
    job: &obscura_db::JobRow,
    team_guid: Guid,
) -> Result<Option<PipelineDef>, ApiError> {
    let row = match job.pipeline_guid.as_deref().and_then(|g| g.parse().ok()) {
        Some(guid) => state.catalog.pipeline(guid).await?,
        None => state.catalog.default_pipeline(team_guid).await?,
    };
    let Some(row) = row else {
        return Ok(None);
    };

    let guid: Guid = row
        .guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed pipeline guid"))?;
    Ok(Some(PipelineDef {
        guid,
        name: row.name,
        version: job.pipeline_version.unwrap_or(row.version),
        nodes: serde_json::from_str(&row.nodes_json).unwrap_or_default(),
        edges: serde_json::from_str(&row.edges_json).unwrap_or_default(),
    }))
}

/// `POST /jobs/{guid}/progress` - advisory, rate-limited client side.
pub async fn progress(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
    Json(update): Json<ProgressUpdate>,
) -> Result<StatusCode, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    state
        .queue
        .record_progress(guid, &agent.guid, &update)
        .await
        .map_err(|err| match err {
            DbError::NotFound(msg) => ApiError::not_found(msg),
            DbError::Constraint(msg) | DbError::InvalidState(msg) => ApiError::conflict(msg),
            other => other.into(),
        })?;
    debug!("Progress for job {}: {}", guid, update.stage);
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /jobs/{guid}/input-state` - dedup precheck before a tool runs.
pub async fn input_state(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
    Json(req): Json<InputStateRequest>,
) -> Result<Json<InputStateResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let job = state
        .queue
        .get(guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("job {guid}")))?;
    if job.assigned_agent_guid.as_deref() != Some(agent.guid.as_str()) {
        return Err(ApiError::conflict("job is not assigned to this agent"));
    }

    let Some(collection_guid) = job.collection_guid.as_deref().and_then(|g| g.parse().ok())
    else {
        return Ok(Json(InputStateResponse {
            no_change: false,
            reference_result_guid: None,
        }));
    };
    let tool = job.tool()?;
    if !tool.dedup_eligible() {
        return Ok(Json(InputStateResponse {
            no_change: false,
            reference_result_guid: None,
        }));
    }

    let reference = state
        .results
        .check_input_state(collection_guid, tool, &req.input_state_hash)
        .await?;
    Ok(Json(InputStateResponse {
        no_change: reference.is_some(),
        reference_result_guid: reference,
    }))
}

/// `POST /jobs/{guid}/complete` - inline completion with HMAC signature.
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<obscura_protocol::CompleteResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let response = ingest::ingest_completion(&state, &agent, guid, &req).await?;
    Ok(Json(response))
}

/// `POST /results/upload` - offline result sync, idempotent per result id.
pub async fn offline_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OfflineUploadRequest>,
) -> Result<Json<obscura_protocol::CompleteResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let response = ingest::ingest_offline(&state, &agent, &req).await?;
    Ok(Json(response))
}
