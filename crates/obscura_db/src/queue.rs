//! Persistent job queue with capability-based dispatch.
//!
//! Claiming runs inside a single transaction: promote due scheduled jobs,
//! enumerate pending candidates in `priority DESC, created_at ASC, id ASC`
//! order, pick the first the caller is eligible for, and flip it to
//! `assigned` with an `UPDATE ... WHERE status = 'pending'` guard. SQLite's
//! single-writer transaction makes the guard the skip-locked equivalent:
//! two concurrent pollers can never both see rows_affected = 1 for the
//! same job.

use chrono::{DateTime, Utc};
use obscura_protocol::{capabilities, Guid, JobStatus, ProgressUpdate, ToolKind};
use obscura_security::mint_signing_secret;
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::models::{now_ts, ts, AgentRow, JobRow};
use crate::pool::DbPool;

pub struct JobQueue {
    pool: DbPool,
}

/// A job intent to persist.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub team_guid: Guid,
    pub tool: ToolKind,
    pub mode: Option<String>,
    pub collection_guid: Option<Guid>,
    pub pipeline_guid: Option<Guid>,
    pub pipeline_version: Option<i64>,
    pub priority: i64,
    pub bound_agent_guid: Option<Guid>,
    pub required_capabilities: Vec<String>,
    pub max_retries: i64,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub parent_job_guid: Option<Guid>,
}

impl NewJob {
    pub fn immediate(team_guid: Guid, tool: ToolKind) -> Self {
        Self {
            team_guid,
            tool,
            mode: None,
            collection_guid: None,
            pipeline_guid: None,
            pipeline_version: None,
            priority: 0,
            bound_agent_guid: None,
            required_capabilities: Vec::new(),
            max_retries: obscura_protocol::defaults::DEFAULT_MAX_RETRIES,
            scheduled_for: None,
            parent_job_guid: None,
        }
    }

    pub fn for_collection(mut self, collection: Guid) -> Self {
        self.collection_guid = Some(collection);
        self
    }

    pub fn bound_to(mut self, agent: Guid) -> Self {
        self.bound_agent_guid = Some(agent);
        self
    }

    pub fn requiring(mut self, caps: Vec<String>) -> Self {
        self.required_capabilities = caps;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_at(mut self, when: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(when);
        self
    }
}

/// A claimed job plus the one-time signing secret for its results.
#[derive(Debug)]
pub struct ClaimOutcome {
    pub job: JobRow,
    pub signing_secret_b64: String,
    pub signing_secret_hash: String,
}

impl JobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a job intent.
    ///
    /// Jobs with a future `scheduled_for` enter as `scheduled`; everything
    /// else as `pending`. At most one scheduled job may exist per
    /// (collection, tool) - a second enqueue surfaces as a constraint
    /// error.
    pub async fn enqueue(&self, new_job: NewJob) -> Result<JobRow> {
        let now = Utc::now();
        let status = match new_job.scheduled_for {
            Some(when) if when > now => JobStatus::Scheduled,
            _ => JobStatus::Pending,
        };
        let guid = Guid::new();
        let caps_json = serde_json::to_string(&new_job.required_capabilities)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO jobs (
                guid, team_guid, collection_guid, pipeline_guid, pipeline_version,
                tool, mode, status, priority, bound_agent_guid,
                required_capabilities_json, retry_count, max_retries,
                scheduled_for, parent_job_guid, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(new_job.team_guid.to_string())
        .bind(new_job.collection_guid.map(|g| g.to_string()))
        .bind(new_job.pipeline_guid.map(|g| g.to_string()))
        .bind(new_job.pipeline_version)
        .bind(new_job.tool.as_str())
        .bind(&new_job.mode)
        .bind(status.as_str())
        .bind(new_job.priority)
        .bind(new_job.bound_agent_guid.map(|g| g.to_string()))
        .bind(&caps_json)
        .bind(new_job.max_retries)
        .bind(new_job.scheduled_for.map(ts))
        .bind(new_job.parent_job_guid.map(|g| g.to_string()))
        .bind(ts(now))
        .bind(ts(now))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(DbError::constraint(format!(
                    "a scheduled {} job already exists for this collection",
                    new_job.tool
                )));
            }
            Err(err) => return Err(err.into()),
        }

        let job = self
            .get(guid)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {guid}")))?;
        info!("Enqueued job {} ({}, {})", job.guid, job.tool, job.status);
        Ok(job)
    }

    /// Fetch a job by GUID.
    pub async fn get(&self, guid: Guid) -> Result<Option<JobRow>> {
        let job = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Move due scheduled jobs to pending. Returns how many moved.
    pub async fn promote_due(&self) -> Result<u64> {
        let moved = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', updated_at = ?
            WHERE status = 'scheduled'
              AND (scheduled_for IS NULL OR scheduled_for <= ?)
            "#,
        )
        .bind(now_ts())
        .bind(now_ts())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if moved > 0 {
            debug!("Promoted {} scheduled jobs to pending", moved);
        }
        Ok(moved)
    }

    /// Claim at most one due job for the agent.
    ///
    /// Eligibility: the job is bound to the caller, or it is unbound and
    /// its required capabilities are a subset of the caller's while the
    /// caller is verified and not outdated. A fresh 32-byte signing secret
    /// is minted on success; only its hash is stored.
    pub async fn claim(&self, agent: &AgentRow) -> Result<Option<ClaimOutcome>> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // Promote due scheduled jobs inside the same transaction so a
        // just-due refresh is claimable by this very poll.
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', updated_at = ?
            WHERE team_guid = ? AND status = 'scheduled'
              AND (scheduled_for IS NULL OR scheduled_for <= ?)
            "#,
        )
        .bind(ts(now))
        .bind(&agent.team_guid)
        .bind(ts(now))
        .execute(&mut *tx)
        .await?;

        let candidates = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE team_guid = ? AND status = 'pending'
              AND (scheduled_for IS NULL OR scheduled_for <= ?)
              AND (bound_agent_guid = ? OR bound_agent_guid IS NULL)
            ORDER BY priority DESC, created_at ASC, id ASC
            "#,
        )
        .bind(&agent.team_guid)
        .bind(ts(now))
        .bind(&agent.guid)
        .fetch_all(&mut *tx)
        .await?;

        let agent_caps = agent.capabilities();
        let eligible = candidates.into_iter().find(|job| {
            match &job.bound_agent_guid {
                Some(bound) => bound == &agent.guid,
                None => {
                    agent.is_verified
                        && !agent.is_outdated
                        && capabilities::is_subset(&job.required_capabilities(), &agent_caps)
                }
            }
        });

        let Some(job) = eligible else {
            tx.commit().await?;
            return Ok(None);
        };

        let (secret_b64, secret_hash) = mint_signing_secret();
        let rows_affected = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'assigned',
                assigned_agent_guid = ?,
                assigned_at = ?,
                signing_secret_hash = ?,
                updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(&agent.guid)
        .bind(ts(now))
        .bind(&secret_hash)
        .bind(ts(now))
        .bind(job.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Claimed by another poller between SELECT and UPDATE.
            tx.commit().await?;
            return Ok(None);
        }

        let job = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(job.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Job {} claimed by agent {}", job.guid, agent.guid);

        Ok(Some(ClaimOutcome {
            job,
            signing_secret_b64: secret_b64,
            signing_secret_hash: secret_hash,
        }))
    }

    /// Record a progress report from the owning agent.
    ///
    /// The first report moves an `assigned` job to `running` and stamps
    /// `started_at`.
    pub async fn record_progress(
        &self,
        job_guid: Guid,
        agent_guid: &str,
        progress: &ProgressUpdate,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE guid = ?")
            .bind(job_guid.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {job_guid}")))?;

        if job.assigned_agent_guid.as_deref() != Some(agent_guid) {
            return Err(DbError::constraint(format!(
                "job {job_guid} is not assigned to agent {agent_guid}"
            )));
        }

        let status = job.status()?;
        if !matches!(status, JobStatus::Assigned | JobStatus::Running) {
            return Err(DbError::invalid_state(format!(
                "job {job_guid} is {status}, not accepting progress"
            )));
        }

        let progress_json = serde_json::to_string(progress)?;
        let now = now_ts();
        if status == JobStatus::Assigned {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'running', started_at = ?, progress_json = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&now)
            .bind(&progress_json)
            .bind(&now)
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query("UPDATE jobs SET progress_json = ?, updated_at = ? WHERE id = ?")
                .bind(&progress_json)
                .bind(&now)
                .bind(job.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Finalize a successful completion.
    pub async fn mark_completed(&self, job_guid: Guid, result_guid: Guid) -> Result<()> {
        let now = now_ts();
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', completed_at = ?, result_guid = ?,
                signing_secret_hash = NULL, updated_at = ?
            WHERE guid = ? AND status IN ('assigned', 'running')
            "#,
        )
        .bind(&now)
        .bind(result_guid.to_string())
        .bind(&now)
        .bind(job_guid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(DbError::invalid_state(format!(
                "job {job_guid} cannot complete from its current state"
            )));
        }
        info!("Job {} completed", job_guid);
        Ok(())
    }

    /// Finalize a cancelled job.
    pub async fn mark_cancelled(&self, job_guid: Guid) -> Result<()> {
        let now = now_ts();
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = ?, signing_secret_hash = NULL,
                updated_at = ?
            WHERE guid = ? AND status NOT IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(job_guid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(DbError::invalid_state(format!(
                "job {job_guid} is already terminal"
            )));
        }
        info!("Job {} cancelled", job_guid);
        Ok(())
    }

    /// Record a failed attempt: back to `pending` while retries remain,
    /// `failed` once they are exhausted. The signing secret hash is cleared
    /// either way; a fresh one is minted at the next claim.
    pub async fn fail_or_retry(&self, job_guid: Guid, error: &str) -> Result<JobStatus> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE guid = ?")
            .bind(job_guid.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {job_guid}")))?;

        let now = now_ts();
        let next = if job.retry_count < job.max_retries {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'pending', retry_count = retry_count + 1,
                    assigned_agent_guid = NULL, assigned_at = NULL, started_at = NULL,
                    progress_json = NULL, signing_secret_hash = NULL,
                    error_message = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(error)
            .bind(&now)
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
            JobStatus::Pending
        } else {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'failed', completed_at = ?, signing_secret_hash = NULL,
                    error_message = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&now)
            .bind(error)
            .bind(&now)
            .bind(job.id)
            .execute(&mut *tx)
            .await?;
            JobStatus::Failed
        };

        tx.commit().await?;
        info!(
            "Job {} failed attempt {} -> {}",
            job_guid,
            job.retry_count + 1,
            next
        );
        Ok(next)
    }

    /// Cancel a job that has not been handed to an agent yet.
    ///
    /// Running jobs are cancelled out-of-band via a pending command; the
    /// agent finalizes them with a CANCELLED completion.
    pub async fn cancel_queued(&self, job_guid: Guid) -> Result<bool> {
        let now = now_ts();
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'cancelled', completed_at = ?, updated_at = ?
            WHERE guid = ? AND status IN ('scheduled', 'pending')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(job_guid.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Queue depth by status for a team.
    pub async fn stats(&self, team_guid: &str) -> Result<QueueStats> {
        let stats: QueueStats = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'scheduled') as scheduled,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status IN ('assigned', 'running')) as active,
                COUNT(*) FILTER (WHERE status = 'completed') as completed,
                COUNT(*) FILTER (WHERE status = 'failed') as failed
            FROM jobs
            WHERE team_guid = ?
            "#,
        )
        .bind(team_guid)
        .fetch_one(&self.pool)
        .await?;
        Ok(stats)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct QueueStats {
    pub scheduled: i64,
    pub pending: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{create_pool, DbConfig};
    use crate::schema::ensure_schema;
    use obscura_security::hash_api_key;

    async fn setup() -> DbPool {
        let pool = create_pool(DbConfig::sqlite_memory()).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        pool
    }

    async fn insert_agent(pool: &DbPool, team: Guid, caps: &[&str]) -> AgentRow {
        let guid = Guid::new();
        let caps: Vec<String> = caps.iter().map(|c| c.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO agents (
                guid, team_guid, name, hostname, platform, version, binary_checksum,
                status, is_verified, is_outdated, api_key_hash, api_key_prefix,
                capabilities_json, created_at, updated_at
            )
            VALUES (?, ?, 'studio', 'host', 'linux-x86_64', 'v1.0.0', 'c0ffee',
                    'online', 1, 0, ?, 'oak_test', ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(team.to_string())
        .bind(hash_api_key(&guid.to_string()))
        .bind(serde_json::to_string(&caps).unwrap())
        .bind(now_ts())
        .bind(now_ts())
        .execute(pool)
        .await
        .unwrap();

        sqlx::query_as::<_, AgentRow>("SELECT * FROM agents WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_claim_empty_queue() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        assert!(queue.claim(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_priority_then_bound_then_empty() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(
            &pool,
            team,
            &["local_filesystem", "tool:photostats:v1.0"],
        )
        .await;
        let queue = JobQueue::new(pool);

        let bound = queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .bound_to(agent.guid.parse().unwrap())
                    .with_priority(5),
            )
            .await
            .unwrap();
        let unbound = queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .requiring(vec!["tool:photostats:v1.0".into()])
                    .with_priority(10),
            )
            .await
            .unwrap();

        // Higher-priority unbound job first, bound job second, then empty.
        let first = queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(first.job.guid, unbound.guid);
        assert!(!first.signing_secret_b64.is_empty());
        assert_eq!(
            first.job.signing_secret_hash.as_deref(),
            Some(first.signing_secret_hash.as_str())
        );

        let second = queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(second.job.guid, bound.guid);
        assert_ne!(first.signing_secret_b64, second.signing_secret_b64);

        assert!(queue.claim(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_respects_capability_subset() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .requiring(vec!["tool:photostats:v1.0".into()]),
            )
            .await
            .unwrap();

        assert!(queue.claim(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unverified_agent_cannot_claim_unbound() {
        let pool = setup().await;
        let team = Guid::new();
        let mut agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        agent.is_verified = false;
        let queue = JobQueue::new(pool);

        queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();

        assert!(queue.claim(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_outdated_agent_still_claims_bound_jobs() {
        let pool = setup().await;
        let team = Guid::new();
        let mut agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        agent.is_outdated = true;
        let queue = JobQueue::new(pool);

        queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();
        let bound = queue
            .enqueue(
                NewJob::immediate(team, ToolKind::PhotoPairing)
                    .bound_to(agent.guid.parse().unwrap()),
            )
            .await
            .unwrap();

        let claimed = queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(claimed.job.guid, bound.guid);
        assert!(queue.claim(&agent).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scheduled_job_not_claimable_until_due() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        let job = queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .for_collection(Guid::new())
                    .scheduled_at(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();
        assert_eq!(job.status, "scheduled");

        assert!(queue.claim(&agent).await.unwrap().is_none());

        // Force due and try again.
        sqlx::query("UPDATE jobs SET scheduled_for = ? WHERE id = ?")
            .bind(ts(Utc::now() - chrono::Duration::minutes(1)))
            .bind(job.id)
            .execute(&queue.pool)
            .await
            .unwrap();

        let claimed = queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(claimed.job.guid, job.guid);
    }

    #[tokio::test]
    async fn test_scheduled_uniqueness_per_collection_tool() {
        let pool = setup().await;
        let team = Guid::new();
        let collection = Guid::new();
        let queue = JobQueue::new(pool);

        let when = Utc::now() + chrono::Duration::hours(1);
        queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .for_collection(collection)
                    .scheduled_at(when),
            )
            .await
            .unwrap();

        let dup = queue
            .enqueue(
                NewJob::immediate(team, ToolKind::Photostats)
                    .for_collection(collection)
                    .scheduled_at(when),
            )
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));

        // A different tool for the same collection is fine.
        queue
            .enqueue(
                NewJob::immediate(team, ToolKind::PhotoPairing)
                    .for_collection(collection)
                    .scheduled_at(when),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retry_then_fail() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        let mut job = queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();
        sqlx::query("UPDATE jobs SET max_retries = 1 WHERE id = ?")
            .bind(job.id)
            .execute(&queue.pool)
            .await
            .unwrap();

        let guid: Guid = job.guid.parse().unwrap();

        // First failure: retries remain, back to pending.
        queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(
            queue.fail_or_retry(guid, "walk failed").await.unwrap(),
            JobStatus::Pending
        );
        job = queue.get(guid).await.unwrap().unwrap();
        assert_eq!(job.retry_count, 1);
        assert!(job.signing_secret_hash.is_none());
        assert!(job.assigned_agent_guid.is_none());

        // Second failure: retries exhausted.
        queue.claim(&agent).await.unwrap().unwrap();
        assert_eq!(
            queue.fail_or_retry(guid, "walk failed").await.unwrap(),
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_progress_moves_assigned_to_running() {
        let pool = setup().await;
        let team = Guid::new();
        let agent = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        let job = queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();
        let guid: Guid = job.guid.parse().unwrap();
        queue.claim(&agent).await.unwrap().unwrap();

        queue
            .record_progress(guid, &agent.guid, &ProgressUpdate::stage("scanning"))
            .await
            .unwrap();

        let job = queue.get(guid).await.unwrap().unwrap();
        assert_eq!(job.status, "running");
        assert!(job.started_at.is_some());
        assert_eq!(job.progress().unwrap().stage, "scanning");
    }

    #[tokio::test]
    async fn test_progress_from_wrong_agent_rejected() {
        let pool = setup().await;
        let team = Guid::new();
        let owner = insert_agent(&pool, team, &["local_filesystem"]).await;
        let intruder = insert_agent(&pool, team, &["local_filesystem"]).await;
        let queue = JobQueue::new(pool);

        let job = queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();
        let guid: Guid = job.guid.parse().unwrap();
        queue.claim(&owner).await.unwrap().unwrap();

        let err = queue
            .record_progress(guid, &intruder.guid, &ProgressUpdate::stage("scanning"))
            .await;
        assert!(matches!(err, Err(DbError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_cancel_queued() {
        let pool = setup().await;
        let team = Guid::new();
        let queue = JobQueue::new(pool);

        let job = queue
            .enqueue(NewJob::immediate(team, ToolKind::Photostats))
            .await
            .unwrap();
        let guid: Guid = job.guid.parse().unwrap();

        assert!(queue.cancel_queued(guid).await.unwrap());
        assert_eq!(queue.get(guid).await.unwrap().unwrap().status, "cancelled");
        // Terminal: a second cancel is a no-op.
        assert!(!queue.cancel_queued(guid).await.unwrap());
    }
}
