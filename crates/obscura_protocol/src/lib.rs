//! Wire contract between the Obscura server and its agents.
//!
//! Control plane only - report bytes flow through the chunked upload
//! endpoints, everything else is JSON over HTTP. Both sides of the wire
//! depend on this crate so request/response shapes and the canonical
//! signing form cannot drift.

pub mod canonical;
pub mod defaults;
pub mod error;
pub mod input_state;
pub mod types;
pub mod version;
pub mod wire;

// Re-export the types used on nearly every call site.
pub use canonical::{canonical_json, canonical_json_of};
pub use error::{exit_codes, AgentError, AgentResult};
pub use input_state::{extension_config_slice, FileFingerprint, InputState};
pub use types::{
    capabilities, AgentStatus, CollectionType, ConnectorType, CredentialLocation, FileInfo, Guid,
    JobStatus, ResultStatus, ToolKind,
};
pub use wire::{
    cancel_command, parse_cancel_command, AgentCollectionsResponse, AgentMetrics,
    CameraDiscoverRequest, CameraDiscoverResponse, ChunkAppendRequest, ChunkCommitRequest,
    ChunkStartRequest, ChunkStartResponse, ClaimResponse, ClaimedJob, CollectionSummary,
    CompleteRequest, CompleteResponse, ConnectorInfo, DiscoveredCamera, ErrorBody,
    HeartbeatRequest, HeartbeatResponse, InputStateRequest, InputStateResponse, JobConfig,
    OfflineResultPayload, OfflineUploadRequest, PipelineDef, ProgressUpdate, RegisterRequest,
    RegisterResponse, ResultPayload, TeamConfig, TeamConfigResponse, ERROR_CODE_AGENT_REVOKED,
};
