//! HTTP control plane for the Obscura job substrate.
//!
//! Owns the job queue, the agent registry, the release manifest, team
//! configuration, and analysis-result storage. Agents talk to it over the
//! JSON API defined in `obscura_protocol::wire`; every job-mutating
//! endpoint runs inside a database transaction.

pub mod api;
pub mod ingest;
pub mod secrets;
pub mod sweeper;
pub mod uploads;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use obscura_db::{
    AgentRegistry, CatalogStore, ConfigStore, DbError, DbPool, JobQueue, ReleaseStore,
    ResultStore, RetentionSweeper,
};
use obscura_protocol::{ErrorBody, ERROR_CODE_AGENT_REVOKED};
use obscura_security::MasterKey;
use std::path::PathBuf;
use std::sync::Arc;

use crate::secrets::SecretCache;
use crate::uploads::UploadSessions;

/// Shared state behind every handler.
pub struct AppState {
    pub pool: DbPool,
    pub queue: JobQueue,
    pub registry: AgentRegistry,
    pub results: ResultStore,
    pub catalog: CatalogStore,
    pub config: ConfigStore,
    pub releases: ReleaseStore,
    pub sweeper: RetentionSweeper,
    pub secrets: SecretCache,
    pub uploads: UploadSessions,
    /// Decrypts server-held connector credentials for delivery at claim.
    pub master_key: MasterKey,
    /// Directory holding release artifact binaries.
    pub releases_dir: PathBuf,
}

impl AppState {
    pub fn new(pool: DbPool, master_key: MasterKey, releases_dir: PathBuf) -> Self {
        Self {
            queue: JobQueue::new(pool.clone()),
            registry: AgentRegistry::new(pool.clone()),
            results: ResultStore::new(pool.clone()),
            catalog: CatalogStore::new(pool.clone()),
            config: ConfigStore::new(pool.clone()),
            releases: ReleaseStore::new(pool.clone()),
            sweeper: RetentionSweeper::new(pool.clone()),
            secrets: SecretCache::new(),
            uploads: UploadSessions::new(),
            master_key,
            releases_dir,
            pool,
        }
    }
}

/// API error carrying the status and the `{ "error": ... }` body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: None,
        }
    }

    pub fn revoked() -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: "agent has been revoked".into(),
            code: Some(ERROR_CODE_AGENT_REVOKED.into()),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match &err {
            DbError::NotFound(msg) => ApiError::not_found(msg.clone()),
            DbError::Constraint(msg) => ApiError::conflict(msg.clone()),
            DbError::InvalidState(msg) => ApiError::conflict(msg.clone()),
            DbError::Sqlx(_) | DbError::Serialization(_) => {
                tracing::error!("internal error: {}", err);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });
        (self.status, body).into_response()
    }
}

/// Build the axum router with all control-plane routes.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/agents/register", post(api::agents::register))
        .route("/agents/{guid}/heartbeat", post(api::agents::heartbeat))
        .route(
            "/agents/{guid}/pending_commands",
            put(api::agents::append_pending_commands),
        )
        .route(
            "/agents/{guid}/collections",
            get(api::agents::list_collections),
        )
        .route("/jobs/claim", post(api::jobs::claim))
        .route("/jobs/{guid}/config", get(api::jobs::job_config))
        .route("/jobs/{guid}/progress", post(api::jobs::progress))
        .route("/jobs/{guid}/input-state", post(api::jobs::input_state))
        .route("/jobs/{guid}/complete", post(api::jobs::complete))
        .route("/chunks/start", post(api::uploads::start))
        .route("/chunks/append", post(api::uploads::append))
        .route("/chunks/commit", post(api::uploads::commit))
        .route("/results/upload", post(api::jobs::offline_upload))
        .route("/team/config", get(api::config::team_config))
        .route("/cameras/discover", post(api::config::discover_cameras))
        .route(
            "/releases/{version}/{platform}",
            get(api::releases::download),
        )
        .with_state(state)
}
