//! Obscura agent: the worker side of the job substrate.
//!
//! One process, one cooperative polling task, at most one in-flight job.
//! Heartbeats run on a second task; the delayed progress send on a
//! third. Everything the agent persists lives under its data directory:
//! the master key, caches, the credential store, and the offline result
//! spool.

pub mod api_client;
pub mod cache;
pub mod cancel;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod config_resolver;
pub mod credential_store;
pub mod executor;
pub mod heartbeat;
pub mod metrics;
pub mod polling;
pub mod progress;
pub mod storage;
pub mod tools;

pub use api_client::ApiClient;
pub use cancel::{CancellationToken, ExecutionSlot};
pub use config::{AgentConfig, AgentPaths};
pub use executor::JobExecutor;
pub use polling::JobPollingLoop;
pub use progress::ProgressReporter;
