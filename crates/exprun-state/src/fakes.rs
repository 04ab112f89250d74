//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySnapshotStore` that satisfies the `SnapshotStore` contract
//! without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory snapshot store backed by a `HashMap<(org, snapshot_id), document>`.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    docs: Mutex<HashMap<(String, String), SnapshotDocument>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key(organization: &str, snapshot_id: &str) -> (String, String) {
    (organization.to_string(), snapshot_id.to_string())
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn insert(
        &self,
        organization: &str,
        snapshot_id: &str,
        experiment_id: &str,
        body: Value,
    ) -> StorageResult<SnapshotDocument> {
        let body = Value::Object(body_object(body)?);
        let mut docs = self.docs.lock().unwrap();
        let k = key(organization, snapshot_id);
        if docs.contains_key(&k) {
            return Err(StorageError::AlreadyExists {
                organization: organization.to_string(),
                snapshot_id: snapshot_id.to_string(),
            });
        }
        let now = Utc::now();
        let doc = SnapshotDocument {
            organization: organization.to_string(),
            snapshot_id: snapshot_id.to_string(),
            experiment_id: experiment_id.to_string(),
            version: 1,
            body,
            created_at: now,
            updated_at: now,
        };
        docs.insert(k, doc.clone());
        Ok(doc)
    }

    async fn get(
        &self,
        organization: &str,
        snapshot_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        let docs = self.docs.lock().unwrap();
        Ok(docs.get(&key(organization, snapshot_id)).cloned())
    }

    async fn update(
        &self,
        organization: &str,
        snapshot_id: &str,
        fields: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> StorageResult<SnapshotDocument> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&key(organization, snapshot_id))
            .ok_or_else(|| StorageError::NotFound {
                organization: organization.to_string(),
                snapshot_id: snapshot_id.to_string(),
            })?;
        if let Some(expected) = expected_version {
            if doc.version != expected {
                return Err(StorageError::VersionConflict {
                    snapshot_id: snapshot_id.to_string(),
                    expected,
                    actual: doc.version,
                });
            }
        }
        doc.body = merge_fields(doc.body.clone(), fields)?;
        doc.version += 1;
        doc.updated_at = Utc::now();
        Ok(doc.clone())
    }

    async fn latest_for_experiment(
        &self,
        organization: &str,
        experiment_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .values()
            .filter(|d| d.organization == organization && d.experiment_id == experiment_id)
            .max_by_key(|d| d.created_at)
            .cloned())
    }
}
