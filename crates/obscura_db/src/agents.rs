//! Agent registry: registration, heartbeat, attestation, revocation, and
//! the pending-command channel.

use chrono::{Duration, Utc};
use obscura_protocol::{
    capabilities, defaults, version, Guid, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
};
use obscura_security::{hash_api_key, issue_api_key, sha256_hex};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{DbError, Result};
use crate::models::{now_ts, ts, AgentRow, RegistrationTokenRow};
use crate::pool::DbPool;

pub struct AgentRegistry {
    pool: DbPool,
}

impl AgentRegistry {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Mint a single-use registration token. Returns the plaintext; only
    /// its SHA-256 is stored.
    pub async fn create_registration_token(
        &self,
        team_guid: Guid,
        created_by: &str,
        ttl_hours: i64,
    ) -> Result<String> {
        let (plaintext, hash) = obscura_security::issue_registration_token();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO registration_tokens (team_guid, created_by, token_hash, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(team_guid.to_string())
        .bind(created_by)
        .bind(&hash)
        .bind(ts(now + Duration::hours(ttl_hours)))
        .bind(ts(now))
        .execute(&self.pool)
        .await?;
        Ok(plaintext)
    }

    /// Register a new agent against a single-use token.
    ///
    /// The token flips used exactly once inside the same transaction that
    /// creates the agent, so two concurrent registrations with the same
    /// token produce exactly one agent. The presented attestation must
    /// match an active release artifact.
    pub async fn register(&self, req: &RegisterRequest) -> Result<(AgentRow, String)> {
        for root in &req.authorized_roots {
            if !Path::new(root).is_absolute() {
                return Err(DbError::constraint(format!(
                    "authorized root {root} is not an absolute path"
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let token_hash = sha256_hex(req.token.as_bytes());
        let token = sqlx::query_as::<_, RegistrationTokenRow>(
            "SELECT * FROM registration_tokens WHERE token_hash = ?",
        )
        .bind(&token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found("registration token"))?;

        if token.is_used {
            return Err(DbError::invalid_state("registration token already used"));
        }
        if token.is_expired(now) {
            return Err(DbError::invalid_state("registration token expired"));
        }

        let attested: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT a.id FROM release_artifacts a
            JOIN release_manifests m ON m.id = a.manifest_id
            WHERE m.active = 1 AND m.version = ? AND a.platform = ? AND a.checksum = ?
            "#,
        )
        .bind(&req.version)
        .bind(&req.platform)
        .bind(&req.binary_checksum)
        .fetch_optional(&mut *tx)
        .await?;
        if attested.is_none() {
            return Err(DbError::constraint(format!(
                "checksum for {} {} does not match any active release",
                req.version, req.platform
            )));
        }

        let guid = Guid::new();
        let api_key = issue_api_key();
        let caps = ensure_local_filesystem(req.capabilities.clone());

        // The mark-used UPDATE guards on is_used = 0: under two racing
        // registrations only one sees rows_affected = 1.
        let claimed = sqlx::query(
            "UPDATE registration_tokens SET is_used = 1, used_by_agent = ? WHERE id = ? AND is_used = 0",
        )
        .bind(guid.to_string())
        .bind(token.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if claimed == 0 {
            return Err(DbError::invalid_state("registration token already used"));
        }

        sqlx::query(
            r#"
            INSERT INTO agents (
                guid, team_guid, name, hostname, platform, version, binary_checksum,
                status, is_verified, is_outdated, api_key_hash, api_key_prefix,
                capabilities_json, authorized_roots_json, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 'offline', 1, 0, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(&token.team_guid)
        .bind(&req.name)
        .bind(&req.hostname)
        .bind(&req.platform)
        .bind(&req.version)
        .bind(&req.binary_checksum)
        .bind(&api_key.hash)
        .bind(&api_key.prefix)
        .bind(serde_json::to_string(&caps)?)
        .bind(serde_json::to_string(&req.authorized_roots)?)
        .bind(ts(now))
        .bind(ts(now))
        .execute(&mut *tx)
        .await?;

        let agent = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Registered agent {} ({}) for team {}", agent.guid, agent.name, agent.team_guid);
        Ok((agent, api_key.plaintext))
    }

    /// Look an agent up by its plaintext API key.
    pub async fn authenticate(&self, api_key: &str) -> Result<Option<AgentRow>> {
        let agent = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE api_key_hash = ?")
            .bind(hash_api_key(api_key))
            .fetch_optional(&self.pool)
            .await?;
        Ok(agent)
    }

    pub async fn get(&self, guid: Guid) -> Result<Option<AgentRow>> {
        let agent = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(agent)
    }

    /// Process a heartbeat: re-attest the binary, recompute the outdated
    /// flag, refresh liveness, and drain pending commands atomically.
    pub async fn heartbeat(
        &self,
        agent_guid: Guid,
        req: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let agent = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE guid = ?")
            .bind(agent_guid.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("agent {agent_guid}")))?;

        if agent.is_revoked() {
            return Err(DbError::invalid_state("agent revoked"));
        }

        let attested: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT a.id FROM release_artifacts a
            JOIN release_manifests m ON m.id = a.manifest_id
            WHERE m.active = 1 AND m.version = ? AND a.platform = ? AND a.checksum = ?
            "#,
        )
        .bind(&req.version)
        .bind(&req.platform)
        .bind(&req.binary_checksum)
        .fetch_optional(&mut *tx)
        .await?;
        let is_verified = attested.is_some();
        if !is_verified && agent.is_verified {
            warn!(
                "Agent {} checksum no longer matches an active release; claims blocked",
                agent_guid
            );
        }

        let latest = latest_active_version(&mut tx, &req.platform).await?;
        let (is_outdated, latest_version) = match latest {
            Some(latest) if version::is_newer(&latest, &req.version) => (true, Some(latest)),
            _ => (false, None),
        };

        let caps = ensure_local_filesystem(req.capabilities.clone());
        let pending = agent.pending_commands();

        sqlx::query(
            r#"
            UPDATE agents
            SET status = 'online', is_verified = ?, is_outdated = ?,
                capabilities_json = ?, metrics_json = ?,
                version = ?, platform = ?, binary_checksum = ?,
                pending_commands_json = '[]', last_heartbeat = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(is_verified)
        .bind(is_outdated)
        .bind(serde_json::to_string(&caps)?)
        .bind(serde_json::to_string(&req.metrics)?)
        .bind(&req.version)
        .bind(&req.platform)
        .bind(&req.binary_checksum)
        .bind(ts(now))
        .bind(ts(now))
        .bind(agent.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(HeartbeatResponse {
            pending_commands: pending,
            latest_version,
            is_outdated,
        })
    }

    /// Append a command to an agent's pending queue; the next heartbeat
    /// drains it.
    pub async fn append_command(&self, agent_guid: Guid, command: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let agent = sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE guid = ?")
            .bind(agent_guid.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("agent {agent_guid}")))?;

        let mut commands = agent.pending_commands();
        if !commands.iter().any(|c| c == command) {
            commands.push(command.to_string());
        }

        sqlx::query("UPDATE agents SET pending_commands_json = ?, updated_at = ? WHERE id = ?")
            .bind(serde_json::to_string(&commands)?)
            .bind(now_ts())
            .bind(agent.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Revoke an agent. Terminal: every later authenticated request is
    /// refused.
    pub async fn revoke(&self, agent_guid: Guid, reason: &str) -> Result<()> {
        let now = now_ts();
        let rows = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'revoked', revoked_at = ?, revocation_reason = ?, updated_at = ?
            WHERE guid = ? AND status != 'revoked'
            "#,
        )
        .bind(&now)
        .bind(reason)
        .bind(&now)
        .bind(agent_guid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(DbError::not_found(format!("agent {agent_guid}")));
        }
        info!("Agent {} revoked: {}", agent_guid, reason);
        Ok(())
    }

    /// Flip online agents whose last heartbeat fell outside the grace
    /// window back to offline. Returns how many were flipped.
    pub async fn mark_stale_offline(&self, grace_secs: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::seconds(grace_secs);
        let rows = sqlx::query(
            r#"
            UPDATE agents
            SET status = 'offline', updated_at = ?
            WHERE status = 'online' AND (last_heartbeat IS NULL OR last_heartbeat < ?)
            "#,
        )
        .bind(now_ts())
        .bind(ts(cutoff))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows)
    }
}

async fn latest_active_version(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    platform: &str,
) -> Result<Option<String>> {
    let versions: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT m.version FROM release_manifests m
        JOIN release_artifacts a ON a.manifest_id = m.id
        WHERE m.active = 1 AND a.platform = ?
        "#,
    )
    .bind(platform)
    .fetch_all(&mut **tx)
    .await?;

    Ok(versions
        .into_iter()
        .filter(|v| version::parse(v).is_some())
        .max_by_key(|v| version::parse(v)))
}

fn ensure_local_filesystem(mut caps: Vec<String>) -> Vec<String> {
    if !caps.iter().any(|c| c == capabilities::LOCAL_FILESYSTEM) {
        caps.insert(0, capabilities::LOCAL_FILESYSTEM.to_string());
    }
    caps
}

/// Registration token TTL fallback used by token-minting CLIs.
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = defaults::REGISTRATION_TOKEN_TTL_HOURS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::releases::ReleaseStore;
    use crate::schema::ensure_schema;
    use obscura_protocol::AgentMetrics;

    async fn setup() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    fn register_request(token: String) -> RegisterRequest {
        RegisterRequest {
            token,
            name: "studio-mac".into(),
            hostname: "studio.local".into(),
            platform: "darwin-arm64".into(),
            version: "v1.2.0".into(),
            binary_checksum: "c".repeat(64),
            capabilities: vec!["tool:photostats:v1.2.0".into()],
            authorized_roots: vec!["/photos".into()],
        }
    }

    async fn seed_release(pool: &DbPool, version: &str, checksum: &str) {
        let releases = ReleaseStore::new(pool.clone());
        releases
            .publish(version, &[("darwin-arm64", "obscura-agent", checksum, 1024)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_register_happy_path() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, api_key) = registry.register(&register_request(token)).await.unwrap();

        assert_eq!(agent.status, "offline");
        assert!(agent.is_verified);
        assert!(agent
            .capabilities()
            .contains(&capabilities::LOCAL_FILESYSTEM.to_string()));
        assert!(api_key.starts_with("oak_"));

        let authed = registry.authenticate(&api_key).await.unwrap().unwrap();
        assert_eq!(authed.guid, agent.guid);
        assert!(registry.authenticate("oak_wrong").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_token_single_use() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        registry
            .register(&register_request(token.clone()))
            .await
            .unwrap();

        let again = registry.register(&register_request(token)).await;
        assert!(matches!(again, Err(DbError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_checksum() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let mut req = register_request(token);
        req.binary_checksum = "d".repeat(64);

        assert!(matches!(
            registry.register(&req).await,
            Err(DbError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rejects_relative_root() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let mut req = register_request(token);
        req.authorized_roots = vec!["photos".into()];

        assert!(matches!(
            registry.register(&req).await,
            Err(DbError::Constraint(_))
        ));
    }

    fn heartbeat_request(version: &str, checksum: &str) -> HeartbeatRequest {
        HeartbeatRequest {
            capabilities: vec!["tool:photostats:v1.2.0".into()],
            metrics: AgentMetrics {
                cpu_percent: Some(12.0),
                memory_mb: Some(512),
                disk_free_gb: Some(800.0),
            },
            version: version.into(),
            platform: "darwin-arm64".into(),
            binary_checksum: checksum.into(),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_marks_online_and_drains_commands() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, _) = registry.register(&register_request(token)).await.unwrap();
        let guid: Guid = agent.guid.parse().unwrap();

        registry
            .append_command(guid, "cancel_job:4f4e9e3e-0000-0000-0000-000000000001")
            .await
            .unwrap();

        let resp = registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await
            .unwrap();
        assert_eq!(resp.pending_commands.len(), 1);
        assert!(!resp.is_outdated);

        // Drained: the next heartbeat sees nothing.
        let resp = registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await
            .unwrap();
        assert!(resp.pending_commands.is_empty());

        let agent = registry.get(guid).await.unwrap().unwrap();
        assert_eq!(agent.status, "online");
        assert_eq!(agent.metrics().memory_mb, Some(512));
    }

    #[tokio::test]
    async fn test_heartbeat_unverifies_on_deactivated_release() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool.clone());

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, _) = registry.register(&register_request(token)).await.unwrap();
        let guid: Guid = agent.guid.parse().unwrap();

        ReleaseStore::new(pool)
            .deactivate("v1.2.0")
            .await
            .unwrap();

        registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await
            .unwrap();
        let agent = registry.get(guid).await.unwrap().unwrap();
        assert!(!agent.is_verified);
    }

    #[tokio::test]
    async fn test_heartbeat_flags_outdated() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        seed_release(&pool, "v1.3.0", &"e".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, _) = registry.register(&register_request(token)).await.unwrap();
        let guid: Guid = agent.guid.parse().unwrap();

        let resp = registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await
            .unwrap();
        assert!(resp.is_outdated);
        assert_eq!(resp.latest_version.as_deref(), Some("v1.3.0"));
    }

    #[tokio::test]
    async fn test_revoked_agent_cannot_heartbeat() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool);

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, _) = registry.register(&register_request(token)).await.unwrap();
        let guid: Guid = agent.guid.parse().unwrap();

        registry.revoke(guid, "decommissioned").await.unwrap();
        let result = registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await;
        assert!(matches!(result, Err(DbError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_mark_stale_offline() {
        let pool = setup().await;
        seed_release(&pool, "v1.2.0", &"c".repeat(64)).await;
        let registry = AgentRegistry::new(pool.clone());

        let token = registry
            .create_registration_token(Guid::new(), "admin", 24)
            .await
            .unwrap();
        let (agent, _) = registry.register(&register_request(token)).await.unwrap();
        let guid: Guid = agent.guid.parse().unwrap();
        registry
            .heartbeat(guid, &heartbeat_request("v1.2.0", &"c".repeat(64)))
            .await
            .unwrap();

        // Backdate the heartbeat past the grace window.
        sqlx::query("UPDATE agents SET last_heartbeat = ? WHERE guid = ?")
            .bind(ts(Utc::now() - Duration::seconds(600)))
            .bind(agent.guid.clone())
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(registry.mark_stale_offline(90).await.unwrap(), 1);
        assert_eq!(registry.get(guid).await.unwrap().unwrap().status, "offline");
    }
}
