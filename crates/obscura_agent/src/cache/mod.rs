//! Agent-local cache models and storage.
//!
//! - `TestCacheEntry`: cached result of a local path test (24 h TTL)
//! - `CollectionCache`: snapshot of bound collections (7 d TTL)
//! - `TeamConfigCache`: team tool configuration from the server (24 h TTL)
//! - `OfflineResult`: analysis result pending upload (encrypted, no TTL)
//! - version state: cached heartbeat verdict (1 h TTL)
//!
//! `load_valid()` returns `None` for expired content; plain `load()`
//! returns even stale data so callers may print an outdated-cache
//! warning.

pub mod collection_cache;
pub mod result_store;
pub mod team_config_cache;
pub mod test_cache;
pub mod version_cache;

use chrono::{DateTime, Duration, Utc};
use obscura_protocol::{defaults, CollectionType, Guid, PipelineDef, ResultPayload, ToolKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub use collection_cache::CollectionCacheStore;
pub use result_store::OfflineResultStore;
pub use team_config_cache::TeamConfigCacheStore;
pub use test_cache::TestCacheStore;
pub use version_cache::{VersionCacheStore, VersionState};

/// Cached result of a local path test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCacheEntry {
    pub path: String,
    pub path_hash: String,
    pub tested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accessible: bool,
    pub file_count: u64,
    pub photo_count: u64,
    pub sidecar_count: u64,
    pub tools_tested: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues_found: Option<Value>,
    pub agent_id: String,
    pub agent_version: String,
}

impl TestCacheEntry {
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// One bound collection in the local snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedCollection {
    pub guid: Guid,
    pub name: String,
    pub collection_type: CollectionType,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_guid: Option<Guid>,
}

/// Snapshot of the collections bound to this agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCache {
    pub agent_guid: Guid,
    pub synced_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub collections: Vec<CachedCollection>,
}

impl CollectionCache {
    pub fn fresh(agent_guid: Guid, collections: Vec<CachedCollection>) -> Self {
        let now = Utc::now();
        Self {
            agent_guid,
            synced_at: now,
            expires_at: now + Duration::days(defaults::COLLECTION_CACHE_TTL_DAYS),
            collections,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Team tool configuration fetched from the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfigCache {
    pub agent_guid: Guid,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub photo_extensions: Vec<String>,
    pub metadata_extensions: Vec<String>,
    #[serde(default)]
    pub cameras: HashMap<String, Value>,
    #[serde(default)]
    pub processing_methods: HashMap<String, String>,
    pub require_sidecar: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_pipeline: Option<PipelineDef>,
}

impl TeamConfigCache {
    /// Build from a `GET /team/config` response.
    pub fn from_response(
        agent_guid: Guid,
        response: &obscura_protocol::TeamConfigResponse,
    ) -> Self {
        let now = Utc::now();
        Self {
            agent_guid,
            fetched_at: now,
            expires_at: now + Duration::hours(defaults::TEAM_CONFIG_CACHE_TTL_HOURS),
            photo_extensions: response.config.photo_extensions.clone(),
            metadata_extensions: response.config.metadata_extensions.clone(),
            cameras: response.config.cameras.clone(),
            processing_methods: response.config.processing_methods.clone(),
            require_sidecar: response.config.require_sidecar.clone(),
            default_pipeline: response.default_pipeline.clone(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// An analysis result executed offline, spooled until sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineResult {
    pub result_id: Guid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_guid: Option<Guid>,
    pub tool: ToolKind,
    pub executed_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
    pub payload: ResultPayload,
}

impl OfflineResult {
    pub fn new(collection_guid: Option<Guid>, tool: ToolKind, payload: ResultPayload) -> Self {
        Self {
            result_id: Guid::new(),
            collection_guid,
            tool,
            executed_at: Utc::now(),
            synced: false,
            payload,
        }
    }
}
