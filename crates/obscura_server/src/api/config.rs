//! Team configuration and camera discovery endpoints.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use obscura_protocol::{
    defaults, CameraDiscoverRequest, CameraDiscoverResponse, Guid, PipelineDef,
    TeamConfigResponse,
};
use std::sync::Arc;

use crate::api::authenticate;
use crate::{ApiError, AppState};

/// `GET /team/config` - the calling agent's team snapshot plus the
/// default pipeline, if one is set.
pub async fn team_config(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<TeamConfigResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let team_guid: Guid = agent
        .team_guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed team guid"))?;

    let config = state.config.team_config(team_guid).await?;
    let default_pipeline = match state.catalog.default_pipeline(team_guid).await? {
        Some(row) => {
            let guid: Guid = row
                .guid
                .parse()
                .map_err(|_| ApiError::conflict("malformed pipeline guid"))?;
            Some(PipelineDef {
                guid,
                name: row.name,
                version: row.version,
                nodes: serde_json::from_str(&row.nodes_json).unwrap_or_default(),
                edges: serde_json::from_str(&row.edges_json).unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(Json(TeamConfigResponse {
        config,
        default_pipeline,
    }))
}

/// `POST /cameras/discover` - bulk camera id lookup, at most 50 per call.
pub async fn discover_cameras(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CameraDiscoverRequest>,
) -> Result<Json<CameraDiscoverResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    if req.camera_ids.len() > defaults::CAMERA_DISCOVER_LIMIT {
        return Err(ApiError::new(
            axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            format!(
                "at most {} camera ids per call",
                defaults::CAMERA_DISCOVER_LIMIT
            ),
        ));
    }

    let team_guid: Guid = agent
        .team_guid
        .parse()
        .map_err(|_| ApiError::conflict("malformed team guid"))?;
    let cameras = state
        .catalog
        .discover_cameras(team_guid, &req.camera_ids)
        .await?;
    Ok(Json(CameraDiscoverResponse { cameras }))
}
