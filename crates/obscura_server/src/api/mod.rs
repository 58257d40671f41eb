//! HTTP handlers, grouped by resource.

pub mod agents;
pub mod config;
pub mod jobs;
pub mod releases;
pub mod uploads;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use obscura_db::AgentRow;
use serde_json::json;
use std::sync::Arc;

use crate::{ApiError, AppState};

/// Resolve the calling agent from its bearer API key.
///
/// Revoked agents are refused on every authenticated call with the
/// `agent_revoked` error code; clients exit 2 on sight of it.
pub(crate) async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<AgentRow, ApiError> {
    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;

    let agent = state
        .registry
        .authenticate(key)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid api key"))?;

    if agent.is_revoked() {
        return Err(ApiError::revoked());
    }
    Ok(agent)
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // A cheap query proves the store is reachable.
    let db_ok = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();
    Json(json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "time": Utc::now().to_rfc3339(),
    }))
}
