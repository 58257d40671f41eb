//! Release artifact download for agent self-update.
//!
//! Unauthenticated: the artifact checksum in the `X-Checksum` header is
//! what the agent verifies before swapping its binary.

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::fs;
use tracing::warn;

use crate::{ApiError, AppState};

pub const CHECKSUM_HEADER: &str = "x-checksum";

/// `GET /releases/{version}/{platform}`
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((version, platform)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let artifact = state
        .releases
        .find_artifact(&version, &platform)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no release {version} for {platform}")))?;

    let path = state.releases_dir.join(&artifact.filename);
    let bytes = fs::read(&path).await.map_err(|err| {
        warn!("Release artifact {} unreadable: {}", path.display(), err);
        ApiError::not_found("release artifact missing from disk")
    })?;

    let checksum = HeaderValue::from_str(&artifact.checksum)
        .map_err(|_| ApiError::conflict("malformed stored checksum"))?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::HeaderName::from_static(CHECKSUM_HEADER), checksum),
        ],
        bytes,
    )
        .into_response())
}
