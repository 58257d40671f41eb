//! Database models for the Obscura server.
//!
//! Rows keep enum-ish columns as TEXT and JSON columns as serialized
//! strings; typed accessors convert at the edge so the wire enums in
//! `obscura_protocol` stay the single source of truth.

use chrono::{DateTime, SecondsFormat, Utc};
use obscura_protocol::{
    AgentMetrics, AgentStatus, ClaimedJob, CollectionType, CredentialLocation, Guid, JobStatus,
    ProgressUpdate, ResultStatus, ToolKind,
};
use sqlx::FromRow;

use crate::error::{DbError, Result};

/// Canonical stored form of a timestamp: RFC 3339 UTC, second precision.
/// Lexicographic order of these strings matches chronological order.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Current time in the canonical stored form.
pub fn now_ts() -> String {
    ts(Utc::now())
}

fn parse_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

// ============================================================================
// Agents
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct AgentRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub name: String,
    pub hostname: String,
    pub platform: String,
    pub version: String,
    pub binary_checksum: String,
    pub status: String,
    pub is_verified: bool,
    pub is_outdated: bool,
    pub api_key_hash: String,
    pub api_key_prefix: String,
    pub capabilities_json: String,
    pub authorized_roots_json: String,
    pub pending_commands_json: String,
    pub metrics_json: Option<String>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentRow {
    pub fn status(&self) -> Result<AgentStatus> {
        self.status
            .parse()
            .map_err(|_| DbError::invalid_state(format!("agent status {}", self.status)))
    }

    pub fn is_revoked(&self) -> bool {
        self.status == AgentStatus::Revoked.as_str()
    }

    pub fn capabilities(&self) -> Vec<String> {
        parse_json_list(&self.capabilities_json)
    }

    pub fn authorized_roots(&self) -> Vec<String> {
        parse_json_list(&self.authorized_roots_json)
    }

    pub fn pending_commands(&self) -> Vec<String> {
        parse_json_list(&self.pending_commands_json)
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.metrics_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RegistrationTokenRow {
    pub id: i64,
    pub team_guid: String,
    pub created_by: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_by_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RegistrationTokenRow {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub collection_guid: Option<String>,
    pub pipeline_guid: Option<String>,
    pub pipeline_version: Option<i64>,
    pub tool: String,
    pub mode: Option<String>,
    pub status: String,
    pub priority: i64,
    pub bound_agent_guid: Option<String>,
    pub required_capabilities_json: String,
    pub assigned_agent_guid: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress_json: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub parent_job_guid: Option<String>,
    pub signing_secret_hash: Option<String>,
    pub result_guid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    pub fn status(&self) -> Result<JobStatus> {
        self.status
            .parse()
            .map_err(|_| DbError::invalid_state(format!("job status {}", self.status)))
    }

    pub fn tool(&self) -> Result<ToolKind> {
        self.tool
            .parse()
            .map_err(|_| DbError::invalid_state(format!("job tool {}", self.tool)))
    }

    pub fn required_capabilities(&self) -> Vec<String> {
        parse_json_list(&self.required_capabilities_json)
    }

    pub fn progress(&self) -> Option<ProgressUpdate> {
        self.progress_json
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    /// Wire form handed to the claiming agent.
    pub fn to_claimed(&self) -> Result<ClaimedJob> {
        let parse_guid = |raw: &str| -> Result<Guid> {
            raw.parse()
                .map_err(|_| DbError::invalid_state(format!("malformed guid {raw}")))
        };
        Ok(ClaimedJob {
            guid: parse_guid(&self.guid)?,
            tool: self.tool()?,
            mode: self.mode.clone(),
            collection_guid: self
                .collection_guid
                .as_deref()
                .map(parse_guid)
                .transpose()?,
            pipeline_guid: self.pipeline_guid.as_deref().map(parse_guid).transpose()?,
            pipeline_version: self.pipeline_version,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
        })
    }
}

// ============================================================================
// Analysis results
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct AnalysisResultRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub collection_guid: Option<String>,
    pub connector_guid: Option<String>,
    pub pipeline_guid: Option<String>,
    pub pipeline_version: Option<i64>,
    pub tool: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub results_json: String,
    pub report_html: Option<String>,
    pub input_state_hash: Option<String>,
    pub no_change_copy: bool,
    pub download_report_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResultRow {
    pub fn status(&self) -> Result<ResultStatus> {
        self.status
            .parse()
            .map_err(|_| DbError::invalid_state(format!("result status {}", self.status)))
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct CollectionRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub name: String,
    pub collection_type: String,
    pub location: String,
    pub state: String,
    pub bound_agent_guid: Option<String>,
    pub connector_guid: Option<String>,
    /// NULL = pending test, 0/1 after one ran.
    pub is_accessible: Option<bool>,
    pub pipeline_guid: Option<String>,
    pub pipeline_version: Option<i64>,
    pub file_info_json: Option<String>,
    pub file_info_delta_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionRow {
    pub fn collection_type(&self) -> Result<CollectionType> {
        self.collection_type.parse().map_err(|_| {
            DbError::invalid_state(format!("collection type {}", self.collection_type))
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConnectorRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub name: String,
    pub connector_type: String,
    pub credential_location: String,
    pub encrypted_credentials: Option<Vec<u8>>,
    pub inventory_config_json: Option<String>,
    pub validation_status: Option<String>,
    pub latest_manifest_json: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectorRow {
    pub fn credential_location(&self) -> Result<CredentialLocation> {
        self.credential_location.parse().map_err(|_| {
            DbError::invalid_state(format!(
                "connector credential location {}",
                self.credential_location
            ))
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PipelineRow {
    pub id: i64,
    pub guid: String,
    pub team_guid: String,
    pub name: String,
    pub version: i64,
    pub nodes_json: String,
    pub edges_json: String,
    pub is_active: bool,
    pub is_default: bool,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CameraRow {
    pub id: i64,
    pub team_guid: String,
    pub camera_id: String,
    pub name: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Releases
// ============================================================================

#[derive(Debug, Clone, FromRow)]
pub struct ReleaseManifestRow {
    pub id: i64,
    pub guid: String,
    pub version: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReleaseArtifactRow {
    pub id: i64,
    pub manifest_id: i64,
    pub platform: String,
    pub filename: String,
    pub checksum: String,
    pub file_size: i64,
}
