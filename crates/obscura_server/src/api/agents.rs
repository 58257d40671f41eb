//! Agent lifecycle endpoints: registration, heartbeat, pending commands.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use obscura_db::DbError;
use obscura_protocol::{
    AgentCollectionsResponse, CollectionSummary, Guid, HeartbeatRequest, HeartbeatResponse,
    RegisterRequest, RegisterResponse,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::api::authenticate;
use crate::{ApiError, AppState};

/// `POST /agents/register` - one-shot, token-authenticated.
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let (agent, api_key) = state.registry.register(&req).await.map_err(|err| match err {
        DbError::NotFound(_) => ApiError::bad_request("invalid registration token"),
        DbError::InvalidState(msg) => ApiError::conflict(msg),
        DbError::Constraint(msg) => ApiError::forbidden(msg),
        other => other.into(),
    })?;

    let agent_guid = agent
        .guid
        .parse()
        .map_err(|_| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "malformed agent guid"))?;
    Ok(Json(RegisterResponse {
        agent_guid,
        api_key,
    }))
}

/// `POST /agents/{guid}/heartbeat`
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    if agent.guid != guid.to_string() {
        return Err(ApiError::forbidden("key does not match agent"));
    }

    let response = state.registry.heartbeat(guid, &req).await?;
    Ok(Json(response))
}

/// `GET /agents/{guid}/collections` - the collections bound to this
/// agent. Agents cache the answer for 7 days.
pub async fn list_collections(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
) -> Result<Json<AgentCollectionsResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    if agent.guid != guid.to_string() {
        return Err(ApiError::forbidden("key does not match agent"));
    }

    let mut collections = Vec::new();
    for row in state.catalog.collections_bound_to(guid).await? {
        let collection_guid: Guid = row
            .guid
            .parse()
            .map_err(|_| ApiError::conflict("malformed collection guid"))?;
        collections.push(CollectionSummary {
            guid: collection_guid,
            name: row.name.clone(),
            collection_type: row.collection_type()?,
            location: row.location.clone(),
            pipeline_guid: row.pipeline_guid.as_deref().and_then(|g| g.parse().ok()),
        });
    }
    Ok(Json(AgentCollectionsResponse { collections }))
}

#[derive(Debug, Deserialize)]
pub struct PendingCommandsRequest {
    pub commands: Vec<String>,
}

/// `PUT /agents/{guid}/pending_commands` - append commands for the next
/// heartbeat to drain. Team-scoped: the caller must belong to the same
/// team as the target agent.
pub async fn append_pending_commands(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<Guid>,
    headers: HeaderMap,
    Json(req): Json<PendingCommandsRequest>,
) -> Result<StatusCode, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let target = state
        .registry
        .get(guid)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("agent {guid}")))?;
    if target.team_guid != caller.team_guid {
        return Err(ApiError::forbidden("agent belongs to another team"));
    }

    for command in &req.commands {
        state.registry.append_command(guid, command).await?;
    }
    info!(
        "Queued {} pending command(s) for agent {}",
        req.commands.len(),
        guid
    );
    Ok(StatusCode::NO_CONTENT)
}
