//! Server persistence layer for Obscura.
//!
//! SQLite via sqlx. The database is the queue: job-mutating operations run
//! in single transactions with `UPDATE ... WHERE status = ?` guards, and
//! no in-process queue exists anywhere.

pub mod agents;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod queue;
pub mod releases;
pub mod results;
pub mod retention;
pub mod schema;

pub use agents::AgentRegistry;
pub use catalog::CatalogStore;
pub use config::{ConfigStore, RetentionPolicy};
pub use error::{DbError, Result};
pub use models::{
    AgentRow, AnalysisResultRow, CameraRow, CollectionRow, ConnectorRow, JobRow, PipelineRow,
    RegistrationTokenRow, ReleaseArtifactRow, ReleaseManifestRow,
};
pub use pool::{create_pool, DbConfig, DbPool};
pub use queue::{ClaimOutcome, JobQueue, NewJob, QueueStats};
pub use releases::ReleaseStore;
pub use results::{NewResult, ResultStore};
pub use retention::{RetentionSweeper, SweepOutcome};
pub use schema::ensure_schema;
