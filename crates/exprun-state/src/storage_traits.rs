//! Storage trait definitions for exprun
//!
//! `SnapshotStore` is the only persistence abstraction the orchestration layer
//! depends on. Snapshots are stored as opaque JSON object bodies keyed by
//! `(organization, snapshot_id)`; the orchestration layer owns the shape of the
//! body and converts at the boundary.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided for
//! testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A persisted snapshot document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub organization: String,
    pub snapshot_id: String,
    pub experiment_id: String,
    /// Starts at 1 and increments on every successful update.
    pub version: u64,
    /// JSON object holding the snapshot fields.
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Versioned snapshot document store.
///
/// Guarantees:
/// - `insert` never overwrites: a second insert for the same key fails with
///   `StorageError::AlreadyExists`.
/// - `update` shallow-merges `fields` into the stored body; keys not named in
///   `fields` are left untouched, so repeating an update is idempotent.
/// - When `expected_version` is given and does not match the stored version
///   the update is rejected with `StorageError::VersionConflict`.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Create a new snapshot document at version 1.
    async fn insert(
        &self,
        organization: &str,
        snapshot_id: &str,
        experiment_id: &str,
        body: Value,
    ) -> StorageResult<SnapshotDocument>;

    /// Fetch a snapshot document, if present.
    async fn get(
        &self,
        organization: &str,
        snapshot_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>>;

    /// Merge `fields` into the stored body and bump the version.
    async fn update(
        &self,
        organization: &str,
        snapshot_id: &str,
        fields: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> StorageResult<SnapshotDocument>;

    /// Most recently created snapshot for an experiment, if any.
    async fn latest_for_experiment(
        &self,
        organization: &str,
        experiment_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>>;
}

/// Ensure a body is a JSON object and return its map.
pub fn body_object(body: Value) -> StorageResult<Map<String, Value>> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(StorageError::InvalidBody {
            kind: json_kind(&other).to_string(),
        }),
    }
}

/// Shallow-merge `fields` into `body`, returning the merged object.
pub fn merge_fields(body: Value, fields: Map<String, Value>) -> StorageResult<Value> {
    let mut map = body_object(body)?;
    for (key, value) in fields {
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
