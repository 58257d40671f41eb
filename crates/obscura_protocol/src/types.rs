//! Canonical enums and records used across all crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque entity identifier, a hyphenated UUID on the wire and in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Guid {
    type Err = GuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| GuidError::Parse(s.to_string()))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuidError {
    #[error("invalid guid: {0}")]
    Parse(String),
}

// ============================================================================
// Canonical Enums
// ============================================================================

/// Job lifecycle state.
///
/// `scheduled` carries a future `scheduled_for`; the queue treats a job as
/// due when `scheduled_for <= now` or `scheduled_for` is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Scheduled,
    #[default]
    Pending,
    Assigned,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        JobStatus::Scheduled,
        JobStatus::Pending,
        JobStatus::Assigned,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Pending => "pending",
            JobStatus::Assigned => "assigned",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again (cancel included).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "pending" => Ok(JobStatus::Pending),
            "assigned" => Ok(JobStatus::Assigned),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(EnumParseError::new("JobStatus", other)),
        }
    }
}

/// Outcome of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Completed,
    Failed,
    Cancelled,
    NoChange,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Completed => "COMPLETED",
            ResultStatus::Failed => "FAILED",
            ResultStatus::Cancelled => "CANCELLED",
            ResultStatus::NoChange => "NO_CHANGE",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(ResultStatus::Completed),
            "FAILED" => Ok(ResultStatus::Failed),
            "CANCELLED" => Ok(ResultStatus::Cancelled),
            "NO_CHANGE" => Ok(ResultStatus::NoChange),
            other => Err(EnumParseError::new("ResultStatus", other)),
        }
    }
}

/// Analysis tool invoked by a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Photostats,
    PhotoPairing,
    PipelineValidation,
    InventoryImport,
    CollectionTest,
}

impl ToolKind {
    pub const ALL: &'static [ToolKind] = &[
        ToolKind::Photostats,
        ToolKind::PhotoPairing,
        ToolKind::PipelineValidation,
        ToolKind::InventoryImport,
        ToolKind::CollectionTest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Photostats => "photostats",
            ToolKind::PhotoPairing => "photo_pairing",
            ToolKind::PipelineValidation => "pipeline_validation",
            ToolKind::InventoryImport => "inventory_import",
            ToolKind::CollectionTest => "collection_test",
        }
    }

    /// Whether two identical runs may share a report via input-state dedup.
    pub fn dedup_eligible(&self) -> bool {
        matches!(
            self,
            ToolKind::Photostats | ToolKind::PhotoPairing | ToolKind::PipelineValidation
        )
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photostats" => Ok(ToolKind::Photostats),
            "photo_pairing" => Ok(ToolKind::PhotoPairing),
            "pipeline_validation" => Ok(ToolKind::PipelineValidation),
            "inventory_import" => Ok(ToolKind::InventoryImport),
            "collection_test" => Ok(ToolKind::CollectionTest),
            other => Err(EnumParseError::new("ToolKind", other)),
        }
    }
}

/// Agent liveness state. `revoked` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Offline,
    Online,
    Error,
    Revoked,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Offline => "offline",
            AgentStatus::Online => "online",
            AgentStatus::Error => "error",
            AgentStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offline" => Ok(AgentStatus::Offline),
            "online" => Ok(AgentStatus::Online),
            "error" => Ok(AgentStatus::Error),
            "revoked" => Ok(AgentStatus::Revoked),
            other => Err(EnumParseError::new("AgentStatus", other)),
        }
    }
}

/// Where a collection's files live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionType {
    Local,
    S3,
    Gcs,
    Smb,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::Local => "local",
            CollectionType::S3 => "s3",
            CollectionType::Gcs => "gcs",
            CollectionType::Smb => "smb",
        }
    }

    /// Remote collections require a connector; local ones a bound agent.
    pub fn is_remote(&self) -> bool {
        !matches!(self, CollectionType::Local)
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(CollectionType::Local),
            "s3" => Ok(CollectionType::S3),
            "gcs" => Ok(CollectionType::Gcs),
            "smb" => Ok(CollectionType::Smb),
            other => Err(EnumParseError::new("CollectionType", other)),
        }
    }
}

/// Remote storage connector type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorType {
    S3,
    Gcs,
    Smb,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::S3 => "s3",
            ConnectorType::Gcs => "gcs",
            ConnectorType::Smb => "smb",
        }
    }
}

impl fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(ConnectorType::S3),
            "gcs" => Ok(ConnectorType::Gcs),
            "smb" => Ok(ConnectorType::Smb),
            other => Err(EnumParseError::new("ConnectorType", other)),
        }
    }
}

/// Who holds a connector's secret.
///
/// With `agent` the server never sees the credential; only agents whose
/// local store contains `connector:<guid>` may execute jobs touching it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialLocation {
    Server,
    Agent,
    Pending,
}

impl CredentialLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialLocation::Server => "server",
            CredentialLocation::Agent => "agent",
            CredentialLocation::Pending => "pending",
        }
    }
}

impl FromStr for CredentialLocation {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(CredentialLocation::Server),
            "agent" => Ok(CredentialLocation::Agent),
            "pending" => Ok(CredentialLocation::Pending),
            other => Err(EnumParseError::new("CredentialLocation", other)),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind} value: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// FileInfo
// ============================================================================

/// Unified file record produced by every storage adapter.
///
/// `path` is relative to the collection location, `/`-separated on every
/// platform so fingerprints match across agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.into(),
            size,
            last_modified,
        }
    }

    /// Filename without directory.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Extension with leading dot, lowercased. Empty for no extension.
    pub fn extension(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!(".{}", ext.to_lowercase()),
            _ => String::new(),
        }
    }

    /// Filename without extension.
    pub fn stem(&self) -> &str {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => name,
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Capability string helpers.
///
/// An agent advertises what it can handle as flat strings: storage access
/// (`local_filesystem`, `s3`, ...), tools (`tool:photostats:v1.2.0`), and
/// locally-held connector credentials (`connector:<guid>`).
pub mod capabilities {
    use super::{Guid, ToolKind};

    /// Every agent carries this one.
    pub const LOCAL_FILESYSTEM: &str = "local_filesystem";

    pub fn tool(kind: ToolKind, version: &str) -> String {
        format!("tool:{}:{}", kind.as_str(), version)
    }

    pub fn connector(guid: Guid) -> String {
        format!("connector:{}", guid)
    }

    /// True when every required capability is offered.
    pub fn is_subset(required: &[String], offered: &[String]) -> bool {
        required.iter().all(|cap| offered.iter().any(|o| o == cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), *status);
        }
    }

    #[test]
    fn test_result_status_wire_form() {
        let json = serde_json::to_string(&ResultStatus::NoChange).unwrap();
        assert_eq!(json, "\"NO_CHANGE\"");
    }

    #[test]
    fn test_tool_dedup_eligibility() {
        assert!(ToolKind::Photostats.dedup_eligible());
        assert!(ToolKind::PipelineValidation.dedup_eligible());
        assert!(!ToolKind::InventoryImport.dedup_eligible());
        assert!(!ToolKind::CollectionTest.dedup_eligible());
    }

    #[test]
    fn test_file_info_accessors() {
        let f = FileInfo::new("shoot/IMG_0001.CR3", 1000, None);
        assert_eq!(f.name(), "IMG_0001.CR3");
        assert_eq!(f.extension(), ".cr3");
        assert_eq!(f.stem(), "IMG_0001");

        let hidden = FileInfo::new(".hidden", 1, None);
        assert_eq!(hidden.extension(), "");
        assert_eq!(hidden.stem(), ".hidden");

        let bare = FileInfo::new("README", 1, None);
        assert_eq!(bare.extension(), "");
        assert_eq!(bare.stem(), "README");
    }

    #[test]
    fn test_capability_subset() {
        let offered = vec![
            capabilities::LOCAL_FILESYSTEM.to_string(),
            "tool:photostats:v1.0".to_string(),
        ];
        assert!(capabilities::is_subset(&[], &offered));
        assert!(capabilities::is_subset(
            &["tool:photostats:v1.0".to_string()],
            &offered
        ));
        assert!(!capabilities::is_subset(&["s3".to_string()], &offered));
    }

    #[test]
    fn test_guid_round_trip() {
        let guid = Guid::new();
        let parsed: Guid = guid.to_string().parse().unwrap();
        assert_eq!(guid, parsed);
        assert!("not-a-guid".parse::<Guid>().is_err());
    }
}
