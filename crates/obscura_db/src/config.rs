//! Team-scoped configuration rows.
//!
//! Two categories matter to the substrate: `tool_config` (the team's tool
//! configuration snapshot) and `result_retention` (the storage-optimizer
//! windows). Both live in the `configuration` key-value table.

use obscura_protocol::{Guid, TeamConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::models::now_ts;
use crate::pool::DbPool;

pub const CATEGORY_TOOL_CONFIG: &str = "tool_config";
pub const CATEGORY_RETENTION: &str = "result_retention";

/// Retention windows for the periodic sweep, in days (plus the per-
/// collection keep count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub job_completed_days: i64,
    pub job_failed_days: i64,
    pub result_completed_days: i64,
    pub preserve_per_collection: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            job_completed_days: 30,
            job_failed_days: 90,
            result_completed_days: 365,
            preserve_per_collection: 3,
        }
    }
}

pub struct ConfigStore {
    pool: DbPool,
}

impl ConfigStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn get_value<T: DeserializeOwned>(
        &self,
        team_guid: Guid,
        category: &str,
        key: &str,
    ) -> Result<Option<T>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT value_json FROM configuration WHERE team_guid = ? AND category = ? AND key = ?",
        )
        .bind(team_guid.to_string())
        .bind(category)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set_value<T: Serialize>(
        &self,
        team_guid: Guid,
        category: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO configuration (team_guid, category, key, value_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(team_guid, category, key)
            DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at
            "#,
        )
        .bind(team_guid.to_string())
        .bind(category)
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The team's tool configuration snapshot, empty-default when unset.
    pub async fn team_config(&self, team_guid: Guid) -> Result<TeamConfig> {
        Ok(self
            .get_value(team_guid, CATEGORY_TOOL_CONFIG, "snapshot")
            .await?
            .unwrap_or_default())
    }

    pub async fn set_team_config(&self, team_guid: Guid, config: &TeamConfig) -> Result<()> {
        self.set_value(team_guid, CATEGORY_TOOL_CONFIG, "snapshot", config)
            .await
    }

    /// Retention windows for a team, falling back to defaults per key.
    pub async fn retention_policy(&self, team_guid: Guid) -> Result<RetentionPolicy> {
        let defaults = RetentionPolicy::default();
        Ok(RetentionPolicy {
            job_completed_days: self
                .get_value(team_guid, CATEGORY_RETENTION, "job_completed_days")
                .await?
                .unwrap_or(defaults.job_completed_days),
            job_failed_days: self
                .get_value(team_guid, CATEGORY_RETENTION, "job_failed_days")
                .await?
                .unwrap_or(defaults.job_failed_days),
            result_completed_days: self
                .get_value(team_guid, CATEGORY_RETENTION, "result_completed_days")
                .await?
                .unwrap_or(defaults.result_completed_days),
            preserve_per_collection: self
                .get_value(team_guid, CATEGORY_RETENTION, "preserve_per_collection")
                .await?
                .unwrap_or(defaults.preserve_per_collection),
        })
    }

    pub async fn set_retention_policy(
        &self,
        team_guid: Guid,
        policy: &RetentionPolicy,
    ) -> Result<()> {
        self.set_value(
            team_guid,
            CATEGORY_RETENTION,
            "job_completed_days",
            &policy.job_completed_days,
        )
        .await?;
        self.set_value(
            team_guid,
            CATEGORY_RETENTION,
            "job_failed_days",
            &policy.job_failed_days,
        )
        .await?;
        self.set_value(
            team_guid,
            CATEGORY_RETENTION,
            "result_completed_days",
            &policy.result_completed_days,
        )
        .await?;
        self.set_value(
            team_guid,
            CATEGORY_RETENTION,
            "preserve_per_collection",
            &policy.preserve_per_collection,
        )
        .await?;
        Ok(())
    }

    /// Days between automatic refresh runs for a completed refresh job.
    pub async fn auto_refresh_interval_days(&self, team_guid: Guid) -> Result<i64> {
        Ok(self
            .get_value(team_guid, "auto_refresh", "interval_days")
            .await?
            .unwrap_or(7))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;

    async fn setup() -> ConfigStore {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    #[tokio::test]
    async fn test_team_config_round_trip() {
        let store = setup().await;
        let team = Guid::new();

        // Unset: empty defaults.
        assert!(store.team_config(team).await.unwrap().photo_extensions.is_empty());

        let config = TeamConfig {
            photo_extensions: vec![".cr3".into(), ".dng".into()],
            metadata_extensions: vec![".xmp".into()],
            require_sidecar: vec![".cr3".into()],
            ..Default::default()
        };
        store.set_team_config(team, &config).await.unwrap();
        assert_eq!(store.team_config(team).await.unwrap(), config);

        // Upsert replaces.
        let updated = TeamConfig {
            photo_extensions: vec![".nef".into()],
            ..config
        };
        store.set_team_config(team, &updated).await.unwrap();
        assert_eq!(store.team_config(team).await.unwrap().photo_extensions, vec![".nef"]);
    }

    #[tokio::test]
    async fn test_retention_defaults_and_overrides() {
        let store = setup().await;
        let team = Guid::new();

        assert_eq!(
            store.retention_policy(team).await.unwrap(),
            RetentionPolicy::default()
        );

        let policy = RetentionPolicy {
            job_completed_days: 7,
            job_failed_days: 14,
            result_completed_days: 30,
            preserve_per_collection: 1,
        };
        store.set_retention_policy(team, &policy).await.unwrap();
        assert_eq!(store.retention_policy(team).await.unwrap(), policy);
    }
}
