//! Storage optimizer: periodic retention sweep over jobs and results.
//!
//! Per team: completed jobs beyond `job_completed_days` and failed jobs
//! beyond `job_failed_days` are deleted; completed/NO_CHANGE results
//! beyond `result_completed_days` are deleted except the newest
//! `preserve_per_collection` per (collection, tool), and a chain head is
//! never deleted while any NO_CHANGE copy still references it. Counts and
//! estimated bytes freed accumulate into `storage_metrics`.

use chrono::{Duration, Utc};
use obscura_protocol::Guid;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::config::{ConfigStore, RetentionPolicy};
use crate::error::Result;
use crate::models::{now_ts, ts};
use crate::pool::DbPool;

pub struct RetentionSweeper {
    pool: DbPool,
    config: ConfigStore,
}

/// Outcome of one team's sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepOutcome {
    pub jobs_deleted: u64,
    pub results_deleted: u64,
    pub bytes_freed: u64,
}

impl RetentionSweeper {
    pub fn new(pool: DbPool) -> Self {
        let config = ConfigStore::new(pool.clone());
        Self { pool, config }
    }

    /// Sweep every team that has jobs or results on record.
    pub async fn sweep_all(&self) -> Result<SweepOutcome> {
        let teams: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT team_guid FROM jobs
            UNION
            SELECT DISTINCT team_guid FROM analysis_results
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut total = SweepOutcome::default();
        for team in teams {
            let Ok(team_guid) = team.parse::<Guid>() else {
                continue;
            };
            let outcome = self.sweep_team(team_guid).await?;
            total.jobs_deleted += outcome.jobs_deleted;
            total.results_deleted += outcome.results_deleted;
            total.bytes_freed += outcome.bytes_freed;
        }

        if total.jobs_deleted > 0 || total.results_deleted > 0 {
            info!(
                "Retention sweep removed {} jobs, {} results (~{} bytes)",
                total.jobs_deleted, total.results_deleted, total.bytes_freed
            );
        }
        Ok(total)
    }

    /// Sweep one team under its retention policy.
    pub async fn sweep_team(&self, team_guid: Guid) -> Result<SweepOutcome> {
        let policy = self.config.retention_policy(team_guid).await?;
        let mut outcome = SweepOutcome::default();

        outcome.jobs_deleted += self.delete_old_jobs(team_guid, &policy).await?;
        let (results, bytes) = self.delete_old_results(team_guid, &policy).await?;
        outcome.results_deleted += results;
        outcome.bytes_freed += bytes;

        if outcome.jobs_deleted > 0 || outcome.results_deleted > 0 {
            self.accumulate_metrics(team_guid, &outcome).await?;
            debug!(
                "Sweep for team {}: {} jobs, {} results",
                team_guid, outcome.jobs_deleted, outcome.results_deleted
            );
        }
        Ok(outcome)
    }

    async fn delete_old_jobs(&self, team_guid: Guid, policy: &RetentionPolicy) -> Result<u64> {
        let now = Utc::now();
        let completed_cutoff = ts(now - Duration::days(policy.job_completed_days));
        let failed_cutoff = ts(now - Duration::days(policy.job_failed_days));

        let completed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE team_guid = ? AND status = 'completed' AND completed_at < ?
            "#,
        )
        .bind(team_guid.to_string())
        .bind(&completed_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let failed = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE team_guid = ? AND status = 'failed' AND completed_at < ?
            "#,
        )
        .bind(team_guid.to_string())
        .bind(&failed_cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(completed + failed)
    }

    async fn delete_old_results(
        &self,
        team_guid: Guid,
        policy: &RetentionPolicy,
    ) -> Result<(u64, u64)> {
        let cutoff = ts(Utc::now() - Duration::days(policy.result_completed_days));
        let mut tx = self.pool.begin().await?;

        // The newest N per (collection, tool) are preserved regardless of age.
        let preserved: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT guid FROM (
                SELECT guid,
                       ROW_NUMBER() OVER (
                           PARTITION BY collection_guid, tool
                           ORDER BY created_at DESC, id DESC
                       ) AS rn
                FROM analysis_results
                WHERE team_guid = ?
            )
            WHERE rn <= ?
            "#,
        )
        .bind(team_guid.to_string())
        .bind(policy.preserve_per_collection)
        .fetch_all(&mut *tx)
        .await?;
        let preserved: HashSet<String> = preserved.into_iter().collect();

        #[derive(sqlx::FromRow)]
        struct Candidate {
            guid: String,
            no_change_copy: bool,
            bytes: i64,
        }

        let candidates: Vec<Candidate> = sqlx::query_as(
            r#"
            SELECT guid, no_change_copy,
                   LENGTH(results_json) + LENGTH(COALESCE(report_html, '')) AS bytes
            FROM analysis_results
            WHERE team_guid = ? AND status IN ('COMPLETED', 'NO_CHANGE')
              AND created_at < ?
            "#,
        )
        .bind(team_guid.to_string())
        .bind(&cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut deleted = 0u64;
        let mut bytes_freed = 0u64;

        // Copies first, so a head whose only referents also expired can go
        // in the same sweep.
        for candidate in candidates.iter().filter(|c| c.no_change_copy) {
            if preserved.contains(&candidate.guid) {
                continue;
            }
            sqlx::query("DELETE FROM analysis_results WHERE guid = ?")
                .bind(&candidate.guid)
                .execute(&mut *tx)
                .await?;
            deleted += 1;
            bytes_freed += candidate.bytes.max(0) as u64;
        }

        for candidate in candidates.iter().filter(|c| !c.no_change_copy) {
            if preserved.contains(&candidate.guid) {
                continue;
            }
            let referenced: Option<i64> = sqlx::query_scalar(
                "SELECT id FROM analysis_results WHERE download_report_from = ? LIMIT 1",
            )
            .bind(&candidate.guid)
            .fetch_optional(&mut *tx)
            .await?;
            if referenced.is_some() {
                continue;
            }
            sqlx::query("DELETE FROM analysis_results WHERE guid = ?")
                .bind(&candidate.guid)
                .execute(&mut *tx)
                .await?;
            deleted += 1;
            bytes_freed += candidate.bytes.max(0) as u64;
        }

        tx.commit().await?;
        Ok((deleted, bytes_freed))
    }

    async fn accumulate_metrics(&self, team_guid: Guid, outcome: &SweepOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO storage_metrics (team_guid, jobs_deleted, results_deleted, bytes_freed, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(team_guid) DO UPDATE SET
                jobs_deleted = jobs_deleted + excluded.jobs_deleted,
                results_deleted = results_deleted + excluded.results_deleted,
                bytes_freed = bytes_freed + excluded.bytes_freed,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(team_guid.to_string())
        .bind(outcome.jobs_deleted as i64)
        .bind(outcome.results_deleted as i64)
        .bind(outcome.bytes_freed as i64)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::results::{NewResult, ResultStore};
    use crate::schema::ensure_schema;
    use obscura_protocol::{ResultStatus, ToolKind};

    async fn setup() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    async fn backdate_result(pool: &DbPool, guid: &str, days: i64) {
        sqlx::query("UPDATE analysis_results SET created_at = ? WHERE guid = ?")
            .bind(ts(Utc::now() - Duration::days(days)))
            .bind(guid)
            .execute(pool)
            .await
            .unwrap();
    }

    fn result_for(team: Guid, collection: Guid, hash: &str) -> NewResult {
        let now = Utc::now();
        NewResult {
            team_guid: team,
            collection_guid: Some(collection),
            connector_guid: None,
            pipeline_guid: None,
            pipeline_version: None,
            tool: ToolKind::Photostats,
            status: ResultStatus::Completed,
            started_at: now,
            completed_at: now,
            duration_seconds: 1.0,
            results: serde_json::json!({"total_files": 1}),
            report_html: Some("<html>report</html>".into()),
            input_state_hash: Some(hash.to_string()),
        }
    }

    #[tokio::test]
    async fn test_referenced_head_survives_sweep() {
        let pool = setup().await;
        let team = Guid::new();
        let collection = Guid::new();
        let results = ResultStore::new(pool.clone());
        let config = ConfigStore::new(pool.clone());

        config
            .set_retention_policy(
                team,
                &RetentionPolicy {
                    job_completed_days: 1,
                    job_failed_days: 1,
                    result_completed_days: 10,
                    preserve_per_collection: 0,
                },
            )
            .await
            .unwrap();

        let head = results
            .insert(result_for(team, collection, &"ab".repeat(32)))
            .await
            .unwrap();
        let head_guid: Guid = head.guid.parse().unwrap();
        let now = Utc::now();
        let copy = results
            .insert_no_change(team, Some(collection), ToolKind::Photostats, head_guid, now, now)
            .await
            .unwrap();

        // Head is old, copy is fresh: the head must survive.
        backdate_result(&pool, &head.guid, 30).await;

        let sweeper = RetentionSweeper::new(pool.clone());
        let outcome = sweeper.sweep_team(team).await.unwrap();
        assert_eq!(outcome.results_deleted, 0);
        assert!(results.get(head_guid).await.unwrap().is_some());

        // Once the copy expires too, both go - copy first, head after.
        backdate_result(&pool, &copy.guid, 30).await;
        let outcome = sweeper.sweep_team(team).await.unwrap();
        assert_eq!(outcome.results_deleted, 2);
        assert!(results.get(head_guid).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_preserve_per_collection_keeps_newest() {
        let pool = setup().await;
        let team = Guid::new();
        let collection = Guid::new();
        let results = ResultStore::new(pool.clone());
        let config = ConfigStore::new(pool.clone());

        config
            .set_retention_policy(
                team,
                &RetentionPolicy {
                    job_completed_days: 1,
                    job_failed_days: 1,
                    result_completed_days: 10,
                    preserve_per_collection: 1,
                },
            )
            .await
            .unwrap();

        let older = results
            .insert(result_for(team, collection, &"aa".repeat(32)))
            .await
            .unwrap();
        let newer = results
            .insert(result_for(team, collection, &"bb".repeat(32)))
            .await
            .unwrap();
        backdate_result(&pool, &older.guid, 40).await;
        backdate_result(&pool, &newer.guid, 20).await;

        let sweeper = RetentionSweeper::new(pool.clone());
        let outcome = sweeper.sweep_team(team).await.unwrap();

        // Both are past the window, but the newest per (collection, tool)
        // is preserved.
        assert_eq!(outcome.results_deleted, 1);
        assert!(results
            .get(older.guid.parse().unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(results
            .get(newer.guid.parse().unwrap())
            .await
            .unwrap()
            .is_some());
        assert!(outcome.bytes_freed > 0);
    }

    #[tokio::test]
    async fn test_old_jobs_deleted_and_metrics_accumulate() {
        let pool = setup().await;
        let team = Guid::new();
        let config = ConfigStore::new(pool.clone());
        config
            .set_retention_policy(
                team,
                &RetentionPolicy {
                    job_completed_days: 7,
                    job_failed_days: 7,
                    result_completed_days: 365,
                    preserve_per_collection: 3,
                },
            )
            .await
            .unwrap();

        for status in ["completed", "failed"] {
            sqlx::query(
                r#"
                INSERT INTO jobs (guid, team_guid, tool, status, priority, retry_count,
                                  max_retries, required_capabilities_json, completed_at,
                                  created_at, updated_at)
                VALUES (?, ?, 'photostats', ?, 0, 0, 3, '[]', ?, ?, ?)
                "#,
            )
            .bind(Guid::new().to_string())
            .bind(team.to_string())
            .bind(status)
            .bind(ts(Utc::now() - Duration::days(30)))
            .bind(now_ts())
            .bind(now_ts())
            .execute(&pool)
            .await
            .unwrap();
        }

        let sweeper = RetentionSweeper::new(pool.clone());
        let outcome = sweeper.sweep_all().await.unwrap();
        assert_eq!(outcome.jobs_deleted, 2);

        let (jobs_deleted, results_deleted): (i64, i64) = sqlx::query_as(
            "SELECT jobs_deleted, results_deleted FROM storage_metrics WHERE team_guid = ?",
        )
        .bind(team.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(jobs_deleted, 2);
        assert_eq!(results_deleted, 0);
    }
}
