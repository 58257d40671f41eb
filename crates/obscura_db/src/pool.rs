//! SQLite pool creation.
//!
//! The database *is* the queue: every job-mutating path runs inside a
//! single transaction on this pool, and SQLite's single-writer model gives
//! claim the skip-locked equivalence the dispatch contract needs.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::Result;

/// Database pool type alias.
pub type DbPool = Pool<Sqlite>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum connections in the pool
    pub max_connections: u32,
}

impl DbConfig {
    /// Create a file-backed SQLite configuration.
    pub fn sqlite(path: impl AsRef<str>) -> Self {
        Self {
            url: format!("sqlite:{}?mode=rwc", path.as_ref()),
            max_connections: 5,
        }
    }

    /// Create an in-memory SQLite configuration (for testing).
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
        }
    }

    /// Set maximum connections.
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }
}

/// Create a database pool and apply SQLite optimizations.
pub async fn create_pool(config: DbConfig) -> Result<DbPool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    // WAL mode for better concurrent access, NORMAL sync for performance
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
    sqlx::query("PRAGMA synchronous=NORMAL").execute(&pool).await?;
    sqlx::query("PRAGMA foreign_keys=ON").execute(&pool).await?;

    info!("Connected to SQLite database");
    Ok(pool)
}
