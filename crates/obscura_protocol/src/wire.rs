//! HTTP request/response bodies for the server API.
//!
//! Every config shape that crosses the wire is a named record here; the
//! server and the agent both deserialize with `deny_unknown_fields` left
//! off so either side can roll forward first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{
    CollectionType, ConnectorType, CredentialLocation, Guid, ResultStatus, ToolKind,
};

// ============================================================================
// Registration
// ============================================================================

/// `POST /agents/register`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Single-use registration token, plaintext.
    pub token: String,
    pub name: String,
    pub hostname: String,
    /// e.g. "linux-x86_64", "darwin-arm64".
    pub platform: String,
    pub version: String,
    /// 64-hex SHA-256 of the agent binary.
    pub binary_checksum: String,
    pub capabilities: Vec<String>,
    /// Absolute paths the agent may walk for local collections.
    pub authorized_roots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub agent_guid: Guid,
    /// Returned exactly once; the server keeps only its hash.
    pub api_key: String,
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Best-effort system metrics carried in heartbeats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_free_gb: Option<f64>,
}

/// `POST /agents/{guid}/heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub metrics: AgentMetrics,
    pub version: String,
    pub platform: String,
    pub binary_checksum: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    /// Drained atomically: returned here, cleared from the record.
    pub pending_commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    pub is_outdated: bool,
}

/// Pending command telling the agent to interrupt a running job.
pub const CANCEL_COMMAND_PREFIX: &str = "cancel_job:";

/// Parse a `cancel_job:<guid>` pending command.
pub fn parse_cancel_command(command: &str) -> Option<Guid> {
    command
        .strip_prefix(CANCEL_COMMAND_PREFIX)
        .and_then(|guid| guid.parse().ok())
}

/// Format a `cancel_job:<guid>` pending command.
pub fn cancel_command(job_guid: Guid) -> String {
    format!("{}{}", CANCEL_COMMAND_PREFIX, job_guid)
}

// ============================================================================
// Claim
// ============================================================================

/// The job handed to an agent by `POST /jobs/claim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub guid: Guid,
    pub tool: ToolKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_guid: Option<Guid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_guid: Option<Guid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_version: Option<i64>,
    pub priority: i64,
    pub retry_count: i64,
    pub max_retries: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub job: ClaimedJob,
    /// Base64 of the 32-byte per-claim signing secret. Delivered once.
    pub signing_secret_b64: String,
}

// ============================================================================
// Progress / input-state / completion
// ============================================================================

/// `POST /jobs/{guid}/progress`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_scanned: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Self::default()
        }
    }
}

/// `POST /jobs/{guid}/input-state`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStateRequest {
    pub input_state_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputStateResponse {
    pub no_change: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_result_guid: Option<Guid>,
}

/// The signed result payload. The HMAC covers the canonical JSON of this
/// record exactly; field additions change signatures on both sides at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub status: ResultStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// Tool output, shape owned by the tool.
    pub results: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_state_hash: Option<String>,
    #[serde(default)]
    pub no_change_copy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_report_from: Option<Guid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `POST /jobs/{guid}/complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    pub result: ResultPayload,
    /// Hex HMAC-SHA256 over the canonical JSON of `result`.
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub result_guid: Guid,
}

// ============================================================================
// Chunked upload
// ============================================================================

/// `POST /chunks/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStartRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_guid: Option<Guid>,
    pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkStartResponse {
    pub upload_guid: Guid,
}

/// `POST /chunks/append`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAppendRequest {
    pub upload_guid: Guid,
    /// Zero-based; appends must arrive in order.
    pub index: u64,
    pub data_b64: String,
}

/// `POST /chunks/commit` - the assembled bytes are a `CompleteRequest`
/// (job uploads) or an `OfflineUploadRequest` (offline sync).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkCommitRequest {
    pub upload_guid: Guid,
}

// ============================================================================
// Team config
// ============================================================================

/// Per-team tool configuration snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamConfig {
    pub photo_extensions: Vec<String>,
    pub metadata_extensions: Vec<String>,
    #[serde(default)]
    pub cameras: HashMap<String, Value>,
    #[serde(default)]
    pub processing_methods: HashMap<String, String>,
    pub require_sidecar: Vec<String>,
}

/// Pipeline graph: structural reference for validation, and the source of
/// recognized extensions/sidecar policy via its Capture and file-type nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub guid: Guid,
    pub name: String,
    pub version: i64,
    pub nodes: Value,
    pub edges: Value,
}

/// `GET /team/config`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfigResponse {
    pub config: TeamConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pipeline: Option<PipelineDef>,
}

/// Connector details delivered with a job config. `credentials` is present
/// only when the server holds the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorInfo {
    pub guid: Guid,
    pub connector_type: ConnectorType,
    pub credential_location: CredentialLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inventory_manifest: Option<Value>,
}

/// `GET /jobs/{guid}/config` - everything the executor needs for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub team_guid: Guid,
    pub config: TeamConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_type: Option<CollectionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<ConnectorInfo>,
}

// ============================================================================
// Agent collections
// ============================================================================

/// One collection bound to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub guid: Guid,
    pub name: String,
    pub collection_type: CollectionType,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_guid: Option<Guid>,
}

/// `GET /agents/{guid}/collections` - the agent's local working set,
/// cached client-side for 7 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCollectionsResponse {
    pub collections: Vec<CollectionSummary>,
}

// ============================================================================
// Camera discovery
// ============================================================================

/// `POST /cameras/discover`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDiscoverRequest {
    pub camera_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredCamera {
    pub camera_id: String,
    /// "confirmed" for known mappings, "temporary" for fresh ids.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraDiscoverResponse {
    pub cameras: Vec<DiscoveredCamera>,
}

// ============================================================================
// Offline sync
// ============================================================================

/// An offline-executed result being synced after the fact. No per-job
/// signing secret exists for these; the agent API key authenticates the
/// upload instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineResultPayload {
    pub result_id: Guid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_guid: Option<Guid>,
    pub tool: ToolKind,
    pub executed_at: DateTime<Utc>,
    pub result: ResultPayload,
}

/// `POST /results/upload`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineUploadRequest {
    pub result: OfflineResultPayload,
}

// ============================================================================
// Errors
// ============================================================================

/// Error body every non-2xx response carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// `code` value marking a revoked agent; clients exit 2 on sight.
pub const ERROR_CODE_AGENT_REVOKED: &str = "agent_revoked";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_command_round_trip() {
        let guid = Guid::new();
        let cmd = cancel_command(guid);
        assert_eq!(parse_cancel_command(&cmd), Some(guid));
        assert_eq!(parse_cancel_command("restart"), None);
        assert_eq!(parse_cancel_command("cancel_job:garbage"), None);
    }

    #[test]
    fn test_progress_update_omits_empty_fields() {
        let update = ProgressUpdate::stage("scanning");
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"stage":"scanning"}"#);
    }

    #[test]
    fn test_heartbeat_response_round_trip() {
        let resp = HeartbeatResponse {
            pending_commands: vec![cancel_command(Guid::new())],
            latest_version: Some("v1.3.0".into()),
            is_outdated: true,
        };
        let json = serde_json::to_string(&resp).unwrap();
        let back: HeartbeatResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pending_commands.len(), 1);
        assert!(back.is_outdated);
    }

    #[test]
    fn test_result_payload_signable_form_is_stable() {
        use crate::canonical::canonical_json_of;
        use chrono::TimeZone;

        let payload = ResultPayload {
            status: ResultStatus::Completed,
            started_at: Utc.timestamp_opt(1000, 0).unwrap(),
            completed_at: Utc.timestamp_opt(1060, 0).unwrap(),
            duration_seconds: 60.0,
            results: serde_json::json!({"total_files": 2}),
            report_html: None,
            input_state_hash: Some("ab".repeat(32)),
            no_change_copy: false,
            download_report_from: None,
            error_message: None,
        };
        let a = canonical_json_of(&payload).unwrap();
        let b = canonical_json_of(&payload).unwrap();
        assert_eq!(a, b);
        assert!(a.contains(r#""no_change_copy":false"#));
    }
}
