//! Chunked upload endpoints for large reports.
//!
//! The assembled bytes are a `CompleteRequest` when the session names a
//! job, otherwise an `OfflineUploadRequest`; commit runs the same ingest
//! path the inline endpoints use.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use obscura_protocol::{
    ChunkAppendRequest, ChunkCommitRequest, ChunkStartRequest, ChunkStartResponse,
    CompleteRequest, CompleteResponse, OfflineUploadRequest,
};
use std::sync::Arc;

use crate::api::authenticate;
use crate::uploads::UploadError;
use crate::{ingest, ApiError, AppState};

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::UnknownSession => ApiError::not_found("unknown upload session"),
            UploadError::OutOfOrder { .. } => ApiError::conflict(err.to_string()),
            UploadError::BadEncoding => ApiError::bad_request(err.to_string()),
            UploadError::TooLarge => ApiError::bad_request(err.to_string()),
        }
    }
}

/// `POST /chunks/start`
pub async fn start(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChunkStartRequest>,
) -> Result<Json<ChunkStartResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let upload_guid = state
        .uploads
        .start(&agent.guid, req.job_guid, req.total_size)?;
    Ok(Json(ChunkStartResponse { upload_guid }))
}

/// `POST /chunks/append`
pub async fn append(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChunkAppendRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    state
        .uploads
        .append(req.upload_guid, &agent.guid, req.index, &req.data_b64)?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// `POST /chunks/commit` - assemble and ingest.
pub async fn commit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChunkCommitRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let agent = authenticate(&state, &headers).await?;
    let assembled = state.uploads.commit(req.upload_guid, &agent.guid)?;

    match assembled.job_guid {
        Some(job_guid) => {
            let complete: CompleteRequest = serde_json::from_slice(&assembled.bytes)
                .map_err(|_| ApiError::bad_request("assembled upload is not a completion"))?;
            let response = ingest::ingest_completion(&state, &agent, job_guid, &complete).await?;
            Ok(Json(response))
        }
        None => {
            let upload: OfflineUploadRequest = serde_json::from_slice(&assembled.bytes)
                .map_err(|_| ApiError::bad_request("assembled upload is not an offline result"))?;
            let response = ingest::ingest_offline(&state, &agent, &upload).await?;
            Ok(Json(response))
        }
    }
}
