//! Analysis result store with NO_CHANGE reference chains.
//!
//! A NO_CHANGE result never carries report bytes: it points at a chain
//! head (a result with `no_change_copy = 0`) and report reads follow the
//! reference. Retention keeps heads alive while copies point at them.

use chrono::{DateTime, Utc};
use obscura_protocol::{Guid, ResultStatus, ToolKind};
use serde_json::Value;
use tracing::info;

use crate::error::{DbError, Result};
use crate::models::{now_ts, ts, AnalysisResultRow};
use crate::pool::DbPool;

pub struct ResultStore {
    pool: DbPool,
}

/// A full (non-copy) result to persist.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub team_guid: Guid,
    pub collection_guid: Option<Guid>,
    pub connector_guid: Option<Guid>,
    pub pipeline_guid: Option<Guid>,
    pub pipeline_version: Option<i64>,
    pub tool: ToolKind,
    pub status: ResultStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub results: Value,
    pub report_html: Option<String>,
    pub input_state_hash: Option<String>,
}

impl ResultStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Persist a full result.
    pub async fn insert(&self, new: NewResult) -> Result<AnalysisResultRow> {
        self.insert_with_guid(Guid::new(), new).await
    }

    /// Persist a full result under a caller-chosen GUID. Offline sync uses
    /// the agent-side result id here so a re-upload is idempotent.
    pub async fn insert_with_guid(&self, guid: Guid, new: NewResult) -> Result<AnalysisResultRow> {
        if new.status == ResultStatus::NoChange {
            return Err(DbError::invalid_state(
                "NO_CHANGE results must reference a prior result; use insert_no_change",
            ));
        }
        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                guid, team_guid, collection_guid, connector_guid, pipeline_guid,
                pipeline_version, tool, status, started_at, completed_at,
                duration_seconds, results_json, report_html, input_state_hash,
                no_change_copy, download_report_from, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, NULL, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(new.team_guid.to_string())
        .bind(new.collection_guid.map(|g| g.to_string()))
        .bind(new.connector_guid.map(|g| g.to_string()))
        .bind(new.pipeline_guid.map(|g| g.to_string()))
        .bind(new.pipeline_version)
        .bind(new.tool.as_str())
        .bind(new.status.as_str())
        .bind(ts(new.started_at))
        .bind(ts(new.completed_at))
        .bind(new.duration_seconds)
        .bind(serde_json::to_string(&new.results)?)
        .bind(&new.report_html)
        .bind(&new.input_state_hash)
        .bind(now_ts())
        .execute(&self.pool)
        .await?;

        let row = self.must_get(guid).await?;
        info!("Stored result {} ({}, {})", row.guid, row.tool, row.status);
        Ok(row)
    }

    /// Persist a NO_CHANGE copy referencing a chain head.
    ///
    /// The reference must exist and must itself be a head; chains of
    /// copies are collapsed to the original so report reads are one hop.
    pub async fn insert_no_change(
        &self,
        team_guid: Guid,
        collection_guid: Option<Guid>,
        tool: ToolKind,
        reference_guid: Guid,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Result<AnalysisResultRow> {
        let mut tx = self.pool.begin().await?;

        let reference = sqlx::query_as::<_, AnalysisResultRow>(
            "SELECT * FROM analysis_results WHERE guid = ?",
        )
        .bind(reference_guid.to_string())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DbError::not_found(format!("referenced result {reference_guid}")))?;

        if reference.no_change_copy {
            return Err(DbError::invalid_state(format!(
                "result {reference_guid} is itself a NO_CHANGE copy, not a chain head"
            )));
        }

        let guid = Guid::new();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        sqlx::query(
            r#"
            INSERT INTO analysis_results (
                guid, team_guid, collection_guid, connector_guid, pipeline_guid,
                pipeline_version, tool, status, started_at, completed_at,
                duration_seconds, results_json, report_html, input_state_hash,
                no_change_copy, download_report_from, created_at
            )
            VALUES (?, ?, ?, NULL, ?, ?, ?, 'NO_CHANGE', ?, ?, ?, ?, NULL, ?, 1, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(team_guid.to_string())
        .bind(collection_guid.map(|g| g.to_string()))
        .bind(&reference.pipeline_guid)
        .bind(reference.pipeline_version)
        .bind(tool.as_str())
        .bind(ts(started_at))
        .bind(ts(completed_at))
        .bind(duration.max(0.0))
        .bind(&reference.results_json)
        .bind(&reference.input_state_hash)
        .bind(reference_guid.to_string())
        .bind(now_ts())
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, AnalysisResultRow>(
            "SELECT * FROM analysis_results WHERE guid = ?",
        )
        .bind(guid.to_string())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            "Stored NO_CHANGE result {} referencing {}",
            row.guid, reference_guid
        );
        Ok(row)
    }

    pub async fn get(&self, guid: Guid) -> Result<Option<AnalysisResultRow>> {
        let row = sqlx::query_as::<_, AnalysisResultRow>(
            "SELECT * FROM analysis_results WHERE guid = ?",
        )
        .bind(guid.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn must_get(&self, guid: Guid) -> Result<AnalysisResultRow> {
        self.get(guid)
            .await?
            .ok_or_else(|| DbError::not_found(format!("result {guid}")))
    }

    /// The newest chain head for (collection, tool).
    pub async fn latest_head(
        &self,
        collection_guid: Guid,
        tool: ToolKind,
    ) -> Result<Option<AnalysisResultRow>> {
        let row = sqlx::query_as::<_, AnalysisResultRow>(
            r#"
            SELECT * FROM analysis_results
            WHERE collection_guid = ? AND tool = ? AND no_change_copy = 0
              AND status = 'COMPLETED'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(collection_guid.to_string())
        .bind(tool.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Dedup precheck: does the latest head for (collection, tool) carry
    /// this input-state hash? Returns the reference GUID when it does.
    pub async fn check_input_state(
        &self,
        collection_guid: Guid,
        tool: ToolKind,
        input_state_hash: &str,
    ) -> Result<Option<Guid>> {
        let head = self.latest_head(collection_guid, tool).await?;
        match head {
            Some(head) if head.input_state_hash.as_deref() == Some(input_state_hash) => {
                let guid = head
                    .guid
                    .parse()
                    .map_err(|_| DbError::invalid_state("malformed result guid"))?;
                Ok(Some(guid))
            }
            _ => Ok(None),
        }
    }

    /// Resolve where a result's report bytes actually live: the row itself
    /// for heads, the referenced head for NO_CHANGE copies.
    pub async fn report_source(&self, guid: Guid) -> Result<AnalysisResultRow> {
        let row = self.must_get(guid).await?;
        if !row.no_change_copy {
            return Ok(row);
        }
        let reference = row
            .download_report_from
            .as_deref()
            .ok_or_else(|| DbError::invalid_state(format!("copy {guid} has no reference")))?;
        let reference: Guid = reference
            .parse()
            .map_err(|_| DbError::invalid_state("malformed reference guid"))?;
        self.must_get(reference).await
    }
}
