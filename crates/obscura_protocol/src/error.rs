//! Agent-facing error taxonomy.
//!
//! Every failure the agent can see maps onto one of these variants; only
//! the polling loop converts variants into process exit codes.

use thiserror::Error;

/// Process exit codes for the agent CLI.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERIC: i32 = 1;
    pub const REVOKED: i32 = 2;
    pub const AUTHENTICATION: i32 = 3;
    pub const CONNECTION_FAILURES: i32 = 4;
    pub const INTERNAL_ERRORS: i32 = 5;
}

/// Errors surfaced by the agent's API client and job execution paths.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Network unreachable or timed out. Recovered by the polling loop
    /// (count + backoff); fatal only after repeated consecutive failures.
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the API key. Fatal.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The agent has been revoked by an administrator. Fatal.
    #[error("agent revoked: {0}")]
    Revoked(String),

    /// Any other server-side rejection (409 conflicts, 422 validation, 5xx).
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A tool raised during execution. The job is completed with
    /// status=FAILED and retried server-side; the polling loop survives.
    #[error("tool execution failed: {0}")]
    ToolExecution(String),
}

impl AgentError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Exit code when this error terminates the process directly.
    ///
    /// Connection and internal errors normally exit through the polling
    /// loop's consecutive-failure counters (codes 4 and 5); the mapping
    /// here covers the immediate-exit paths.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Revoked(_) => exit_codes::REVOKED,
            AgentError::Authentication(_) => exit_codes::AUTHENTICATION,
            AgentError::Connection(_) => exit_codes::CONNECTION_FAILURES,
            AgentError::Api { .. } | AgentError::ToolExecution(_) => exit_codes::GENERIC,
        }
    }

    /// Connection failures are the only retriable kind at the poll level.
    pub fn is_connection(&self) -> bool {
        matches!(self, AgentError::Connection(_))
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
