//! Database schema creation for all Obscura tables.
//!
//! All CREATE TABLE statements live here - single source of truth.
//! Timestamps are stored as RFC 3339 TEXT in UTC with second precision so
//! lexicographic comparison in SQL matches chronological order.

use tracing::info;

use crate::error::Result;
use crate::pool::DbPool;

/// Ensure all tables and indexes exist.
pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    create_tenancy_tables(pool).await?;
    create_agent_tables(pool).await?;
    create_job_tables(pool).await?;
    create_catalog_tables(pool).await?;
    create_release_tables(pool).await?;

    info!("Database schema verified");
    Ok(())
}

async fn create_tenancy_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS teams (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    // Key-value configuration rows, team scoped. Retention windows live
    // under category 'result_retention'; the tool config snapshot under
    // 'tool_config'.
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS configuration (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_guid TEXT NOT NULL,
            category TEXT NOT NULL,
            key TEXT NOT NULL,
            value_json TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(team_guid, category, key)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS storage_metrics (
            team_guid TEXT PRIMARY KEY,
            jobs_deleted INTEGER NOT NULL DEFAULT 0,
            results_deleted INTEGER NOT NULL DEFAULT 0,
            bytes_freed INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_agent_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS agents (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            name TEXT NOT NULL,
            hostname TEXT NOT NULL,
            platform TEXT NOT NULL,
            version TEXT NOT NULL,
            binary_checksum TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            is_verified INTEGER NOT NULL DEFAULT 1,
            is_outdated INTEGER NOT NULL DEFAULT 0,
            api_key_hash TEXT NOT NULL UNIQUE,
            api_key_prefix TEXT NOT NULL,
            capabilities_json TEXT NOT NULL DEFAULT '[]',
            authorized_roots_json TEXT NOT NULL DEFAULT '[]',
            pending_commands_json TEXT NOT NULL DEFAULT '[]',
            metrics_json TEXT,
            last_heartbeat TEXT,
            revoked_at TEXT,
            revocation_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_agents_team ON agents(team_guid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_agents_status ON agents(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS registration_tokens (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_guid TEXT NOT NULL,
            created_by TEXT NOT NULL,
            token_hash TEXT NOT NULL UNIQUE,
            expires_at TEXT NOT NULL,
            is_used INTEGER NOT NULL DEFAULT 0,
            used_by_agent TEXT,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_job_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            collection_guid TEXT,
            pipeline_guid TEXT,
            pipeline_version INTEGER,
            tool TEXT NOT NULL,
            mode TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 0,
            bound_agent_guid TEXT,
            required_capabilities_json TEXT NOT NULL DEFAULT '[]',
            assigned_agent_guid TEXT,
            assigned_at TEXT,
            started_at TEXT,
            completed_at TEXT,
            progress_json TEXT,
            error_message TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            scheduled_for TEXT,
            parent_job_guid TEXT,
            signing_secret_hash TEXT,
            result_guid TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    // Claim path scans this composite index
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_jobs_claimable
         ON jobs(team_guid, status, scheduled_for, priority)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_jobs_bound_agent ON jobs(bound_agent_guid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_jobs_assigned_agent ON jobs(assigned_agent_guid)")
        .execute(pool)
        .await?;

    // At most one scheduled job per (collection, tool)
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_jobs_scheduled_unique
         ON jobs(collection_guid, tool) WHERE status = 'scheduled'",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS analysis_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            collection_guid TEXT,
            connector_guid TEXT,
            pipeline_guid TEXT,
            pipeline_version INTEGER,
            tool TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            duration_seconds REAL NOT NULL,
            results_json TEXT NOT NULL,
            report_html TEXT,
            input_state_hash TEXT,
            no_change_copy INTEGER NOT NULL DEFAULT 0,
            download_report_from TEXT,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_results_collection_tool
         ON analysis_results(collection_guid, tool, created_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS ix_results_reference
         ON analysis_results(download_report_from)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_catalog_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            name TEXT NOT NULL,
            collection_type TEXT NOT NULL,
            location TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'live',
            bound_agent_guid TEXT,
            connector_guid TEXT,
            is_accessible INTEGER,
            pipeline_guid TEXT,
            pipeline_version INTEGER,
            file_info_json TEXT,
            file_info_delta_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(team_guid, name)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS connectors (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            name TEXT NOT NULL,
            connector_type TEXT NOT NULL,
            credential_location TEXT NOT NULL DEFAULT 'pending',
            encrypted_credentials BLOB,
            inventory_config_json TEXT,
            validation_status TEXT,
            latest_manifest_json TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(team_guid, name)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS pipelines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            team_guid TEXT NOT NULL,
            name TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            nodes_json TEXT NOT NULL,
            edges_json TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_default INTEGER NOT NULL DEFAULT 0,
            is_valid INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    // At most one default pipeline per team
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_pipelines_default
         ON pipelines(team_guid) WHERE is_default = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS cameras (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            team_guid TEXT NOT NULL,
            camera_id TEXT NOT NULL,
            name TEXT,
            status TEXT NOT NULL DEFAULT 'temporary',
            created_at TEXT NOT NULL,
            UNIQUE(team_guid, camera_id)
        )"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_release_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS release_manifests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            guid TEXT NOT NULL UNIQUE,
            version TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS release_artifacts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            manifest_id INTEGER NOT NULL REFERENCES release_manifests(id) ON DELETE CASCADE,
            platform TEXT NOT NULL,
            filename TEXT NOT NULL,
            checksum TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            UNIQUE(manifest_id, platform)
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_artifacts_version_checksum
         ON release_artifacts(manifest_id, checksum)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_artifacts_checksum ON release_artifacts(checksum)")
        .execute(pool)
        .await?;

    Ok(())
}
