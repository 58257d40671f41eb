//! Catalog: collections, connectors, pipelines, and camera mappings.
//!
//! The substrate reads these to assemble job configs and to answer camera
//! discovery; creation paths exist for seeding and admin tooling.

use obscura_protocol::{CollectionType, ConnectorType, DiscoveredCamera, Guid};
use serde_json::Value;

use crate::error::{DbError, Result};
use crate::models::{now_ts, CameraRow, CollectionRow, ConnectorRow, PipelineRow};
use crate::pool::DbPool;

pub struct CatalogStore {
    pool: DbPool,
}

impl CatalogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Create a collection. Local collections must carry a bound agent;
    /// remote ones a connector.
    pub async fn create_collection(
        &self,
        team_guid: Guid,
        name: &str,
        collection_type: CollectionType,
        location: &str,
        bound_agent_guid: Option<Guid>,
        connector_guid: Option<Guid>,
    ) -> Result<CollectionRow> {
        match collection_type {
            CollectionType::Local if bound_agent_guid.is_none() => {
                return Err(DbError::constraint(
                    "local collections require a bound agent",
                ));
            }
            t if t.is_remote() && connector_guid.is_none() => {
                return Err(DbError::constraint(format!(
                    "{t} collections require a connector"
                )));
            }
            _ => {}
        }

        let guid = Guid::new();
        let now = now_ts();
        let inserted = sqlx::query(
            r#"
            INSERT INTO collections (
                guid, team_guid, name, collection_type, location, state,
                bound_agent_guid, connector_guid, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, 'live', ?, ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(team_guid.to_string())
        .bind(name)
        .bind(collection_type.as_str())
        .bind(location)
        .bind(bound_agent_guid.map(|g| g.to_string()))
        .bind(connector_guid.map(|g| g.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(DbError::constraint(format!(
                    "collection name {name} already exists for this team"
                )));
            }
            Err(err) => return Err(err.into()),
        }

        self.collection(guid)
            .await?
            .ok_or_else(|| DbError::not_found(format!("collection {guid}")))
    }

    pub async fn collection(&self, guid: Guid) -> Result<Option<CollectionRow>> {
        let row = sqlx::query_as::<_, CollectionRow>("SELECT * FROM collections WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Collections bound to an agent (its local working set).
    pub async fn collections_bound_to(&self, agent_guid: Guid) -> Result<Vec<CollectionRow>> {
        let rows = sqlx::query_as::<_, CollectionRow>(
            "SELECT * FROM collections WHERE bound_agent_guid = ? ORDER BY name",
        )
        .bind(agent_guid.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Record a collection accessibility verdict (from collection_test).
    pub async fn set_accessibility(&self, guid: Guid, accessible: bool) -> Result<()> {
        sqlx::query("UPDATE collections SET is_accessible = ?, updated_at = ? WHERE guid = ?")
            .bind(accessible)
            .bind(now_ts())
            .bind(guid.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Connectors
    // ------------------------------------------------------------------

    pub async fn create_connector(
        &self,
        team_guid: Guid,
        name: &str,
        connector_type: ConnectorType,
        credential_location: &str,
        encrypted_credentials: Option<Vec<u8>>,
    ) -> Result<ConnectorRow> {
        let guid = Guid::new();
        let now = now_ts();
        sqlx::query(
            r#"
            INSERT INTO connectors (
                guid, team_guid, name, connector_type, credential_location,
                encrypted_credentials, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(team_guid.to_string())
        .bind(name)
        .bind(connector_type.as_str())
        .bind(credential_location)
        .bind(encrypted_credentials)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.connector(guid)
            .await?
            .ok_or_else(|| DbError::not_found(format!("connector {guid}")))
    }

    pub async fn connector(&self, guid: Guid) -> Result<Option<ConnectorRow>> {
        let row = sqlx::query_as::<_, ConnectorRow>("SELECT * FROM connectors WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Replace a connector's stored bucket manifest (inventory imports).
    pub async fn set_connector_manifest(&self, guid: Guid, manifest: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE connectors SET latest_manifest_json = ?, updated_at = ? WHERE guid = ?",
        )
        .bind(serde_json::to_string(manifest)?)
        .bind(now_ts())
        .bind(guid.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    pub async fn create_pipeline(
        &self,
        team_guid: Guid,
        name: &str,
        nodes: &Value,
        edges: &Value,
        is_default: bool,
    ) -> Result<PipelineRow> {
        let guid = Guid::new();
        let now = now_ts();
        let inserted = sqlx::query(
            r#"
            INSERT INTO pipelines (
                guid, team_guid, name, version, nodes_json, edges_json,
                is_active, is_default, is_valid, created_at, updated_at
            )
            VALUES (?, ?, ?, 1, ?, ?, 1, ?, 1, ?, ?)
            "#,
        )
        .bind(guid.to_string())
        .bind(team_guid.to_string())
        .bind(name)
        .bind(serde_json::to_string(nodes)?)
        .bind(serde_json::to_string(edges)?)
        .bind(is_default)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(DbError::constraint(
                    "team already has a default pipeline",
                ));
            }
            Err(err) => return Err(err.into()),
        }

        self.pipeline(guid)
            .await?
            .ok_or_else(|| DbError::not_found(format!("pipeline {guid}")))
    }

    pub async fn pipeline(&self, guid: Guid) -> Result<Option<PipelineRow>> {
        let row = sqlx::query_as::<_, PipelineRow>("SELECT * FROM pipelines WHERE guid = ?")
            .bind(guid.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn default_pipeline(&self, team_guid: Guid) -> Result<Option<PipelineRow>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT * FROM pipelines WHERE team_guid = ? AND is_default = 1 AND is_active = 1",
        )
        .bind(team_guid.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    /// Bulk camera lookup. Unknown ids are recorded as `temporary` so the
    /// inventory importer can attach files to them before an admin
    /// confirms the mapping.
    pub async fn discover_cameras(
        &self,
        team_guid: Guid,
        camera_ids: &[String],
    ) -> Result<Vec<DiscoveredCamera>> {
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(camera_ids.len());

        for camera_id in camera_ids {
            let existing = sqlx::query_as::<_, CameraRow>(
                "SELECT * FROM cameras WHERE team_guid = ? AND camera_id = ?",
            )
            .bind(team_guid.to_string())
            .bind(camera_id)
            .fetch_optional(&mut *tx)
            .await?;

            let camera = match existing {
                Some(row) => DiscoveredCamera {
                    camera_id: row.camera_id,
                    status: row.status,
                    name: row.name,
                },
                None => {
                    sqlx::query(
                        r#"
                        INSERT INTO cameras (team_guid, camera_id, status, created_at)
                        VALUES (?, ?, 'temporary', ?)
                        "#,
                    )
                    .bind(team_guid.to_string())
                    .bind(camera_id)
                    .bind(now_ts())
                    .execute(&mut *tx)
                    .await?;
                    DiscoveredCamera {
                        camera_id: camera_id.clone(),
                        status: "temporary".into(),
                        name: None,
                    }
                }
            };
            out.push(camera);
        }

        tx.commit().await?;
        Ok(out)
    }

    /// Confirm a temporary camera mapping with a display name.
    pub async fn confirm_camera(&self, team_guid: Guid, camera_id: &str, name: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE cameras SET status = 'confirmed', name = ? WHERE team_guid = ? AND camera_id = ?",
        )
        .bind(name)
        .bind(team_guid.to_string())
        .bind(camera_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows == 0 {
            return Err(DbError::not_found(format!("camera {camera_id}")));
        }
        Ok(())
    }
}
