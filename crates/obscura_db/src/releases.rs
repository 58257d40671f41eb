//! Release manifest store: known-good (version, platform, checksum)
//! tuples consulted at registration and on every heartbeat.

use obscura_protocol::Guid;
use tracing::info;

use crate::error::{DbError, Result};
use crate::models::{now_ts, ReleaseArtifactRow, ReleaseManifestRow};
use crate::pool::DbPool;

pub struct ReleaseStore {
    pool: DbPool,
}

impl ReleaseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Publish a release: one manifest row plus one artifact per platform.
    /// Artifacts are `(platform, filename, checksum, file_size)`.
    pub async fn publish(
        &self,
        version: &str,
        artifacts: &[(&str, &str, &str, i64)],
    ) -> Result<ReleaseManifestRow> {
        if artifacts.is_empty() {
            return Err(DbError::constraint("a release needs at least one artifact"));
        }
        for (_, _, checksum, _) in artifacts {
            if checksum.len() != 64 || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(DbError::constraint(format!(
                    "checksum {checksum} is not 64-hex SHA-256"
                )));
            }
        }

        let mut tx = self.pool.begin().await?;
        let guid = Guid::new();

        sqlx::query(
            "INSERT INTO release_manifests (guid, version, active, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(guid.to_string())
        .bind(version)
        .bind(now_ts())
        .execute(&mut *tx)
        .await?;

        let manifest_id: i64 = sqlx::query_scalar("SELECT id FROM release_manifests WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_one(&mut *tx)
            .await?;

        for (platform, filename, checksum, file_size) in artifacts {
            sqlx::query(
                r#"
                INSERT INTO release_artifacts (manifest_id, platform, filename, checksum, file_size)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(manifest_id)
            .bind(platform)
            .bind(filename)
            .bind(checksum)
            .bind(file_size)
            .execute(&mut *tx)
            .await?;
        }

        let manifest =
            sqlx::query_as::<_, ReleaseManifestRow>("SELECT * FROM release_manifests WHERE id = ?")
                .bind(manifest_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;
        info!("Published release {} ({} artifacts)", version, artifacts.len());
        Ok(manifest)
    }

    /// Deactivate every manifest carrying this version.
    pub async fn deactivate(&self, version: &str) -> Result<u64> {
        let rows = sqlx::query("UPDATE release_manifests SET active = 0 WHERE version = ?")
            .bind(version)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if rows > 0 {
            info!("Deactivated release {}", version);
        }
        Ok(rows)
    }

    /// The artifact for a (version, platform), active manifests only.
    pub async fn find_artifact(
        &self,
        version: &str,
        platform: &str,
    ) -> Result<Option<ReleaseArtifactRow>> {
        let artifact = sqlx::query_as::<_, ReleaseArtifactRow>(
            r#"
            SELECT a.* FROM release_artifacts a
            JOIN release_manifests m ON m.id = a.manifest_id
            WHERE m.active = 1 AND m.version = ? AND a.platform = ?
            "#,
        )
        .bind(version)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await?;
        Ok(artifact)
    }
}
