//! SurrealDB-backed SnapshotStore implementation
//!
//! Uses `schema::SnapshotRow` for persistence, converting to
//! `storage_traits::SnapshotDocument` at the boundary. Updates are
//! compare-and-set on the `version` column.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::StorageError;
use crate::schema::SnapshotRow;
use crate::storage_traits::{
    body_object, merge_fields, SnapshotDocument, SnapshotStore, StorageResult,
};
use crate::SurrealHandle;

/// SurrealDB-backed implementation of [`SnapshotStore`].
#[derive(Clone)]
pub struct SurrealSnapshotStore {
    handle: Arc<SurrealHandle>,
}

impl SurrealSnapshotStore {
    pub fn new(handle: Arc<SurrealHandle>) -> Self {
        Self { handle }
    }

    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let handle = SurrealHandle::setup_db().await?;
        Ok(Self::new(Arc::new(handle)))
    }

    async fn fetch_row(
        &self,
        organization: &str,
        snapshot_id: &str,
    ) -> StorageResult<Option<SnapshotRow>> {
        let org = organization.to_string();
        let sid = snapshot_id.to_string();
        let mut res = self
            .handle
            .db()
            .query("SELECT * FROM snapshots WHERE organization = $org AND snapshot_id = $sid")
            .bind(("org", org))
            .bind(("sid", sid))
            .await?;

        let rows: Vec<SnapshotRow> = res.take(0)?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl SnapshotStore for SurrealSnapshotStore {
    #[instrument(skip(self, body))]
    async fn insert(
        &self,
        organization: &str,
        snapshot_id: &str,
        experiment_id: &str,
        body: Value,
    ) -> StorageResult<SnapshotDocument> {
        let body = Value::Object(body_object(body)?);
        if self.fetch_row(organization, snapshot_id).await?.is_some() {
            return Err(StorageError::AlreadyExists {
                organization: organization.to_string(),
                snapshot_id: snapshot_id.to_string(),
            });
        }

        let row = SnapshotRow::new(organization, snapshot_id, experiment_id, body);
        debug!("creating snapshot row");

        let created: Option<SnapshotRow> = self
            .handle
            .db()
            .create("snapshots")
            .content(row)
            .await?;

        created
            .map(SnapshotDocument::from)
            .ok_or_else(|| StorageError::Backend("failed to create snapshot row".to_string()))
    }

    async fn get(
        &self,
        organization: &str,
        snapshot_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        Ok(self
            .fetch_row(organization, snapshot_id)
            .await?
            .map(SnapshotDocument::from))
    }

    #[instrument(skip(self, fields))]
    async fn update(
        &self,
        organization: &str,
        snapshot_id: &str,
        fields: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> StorageResult<SnapshotDocument> {
        let current = self
            .fetch_row(organization, snapshot_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                organization: organization.to_string(),
                snapshot_id: snapshot_id.to_string(),
            })?;

        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(StorageError::VersionConflict {
                    snapshot_id: snapshot_id.to_string(),
                    expected,
                    actual: current.version,
                });
            }
        }

        let next = current.next_version(merge_fields(current.body.clone(), fields)?);
        let mut res = self
            .handle
            .db()
            .query(
                "UPDATE snapshots CONTENT $row \
                 WHERE organization = $org AND snapshot_id = $sid AND version = $current \
                 RETURN AFTER",
            )
            .bind(("row", next))
            .bind(("org", organization.to_string()))
            .bind(("sid", snapshot_id.to_string()))
            .bind(("current", current.version))
            .await?;

        let updated: Vec<SnapshotRow> = res.take(0)?;
        match updated.into_iter().next() {
            Some(row) => Ok(row.into()),
            None => {
                // A concurrent writer bumped the version between read and write.
                let actual = self
                    .fetch_row(organization, snapshot_id)
                    .await?
                    .map(|r| r.version)
                    .unwrap_or(current.version);
                Err(StorageError::VersionConflict {
                    snapshot_id: snapshot_id.to_string(),
                    expected: current.version,
                    actual,
                })
            }
        }
    }

    async fn latest_for_experiment(
        &self,
        organization: &str,
        experiment_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        let org = organization.to_string();
        let eid = experiment_id.to_string();
        let mut res = self
            .handle
            .db()
            .query(
                "SELECT * FROM snapshots WHERE organization = $org AND experiment_id = $eid \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(("org", org))
            .bind(("eid", eid))
            .await?;

        let rows: Vec<SnapshotRow> = res.take(0)?;
        Ok(rows.into_iter().next().map(SnapshotDocument::from))
    }
}
