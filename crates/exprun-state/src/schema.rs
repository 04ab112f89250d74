//! Schema definitions for exprun SurrealDB tables
//!
//! Tables:
//! - snapshots: Experiment result snapshots (versioned documents)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage_traits::SnapshotDocument;

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Row stored in the `snapshots` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub organization: String,
    pub snapshot_id: String,
    pub experiment_id: String,
    pub version: u64,
    pub body: Value,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl SnapshotRow {
    /// Create a fresh row at version 1.
    pub fn new(
        organization: impl Into<String>,
        snapshot_id: impl Into<String>,
        experiment_id: impl Into<String>,
        body: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            organization: organization.into(),
            snapshot_id: snapshot_id.into(),
            experiment_id: experiment_id.into(),
            version: 1,
            body,
            created_at: now,
            updated_at: now,
        }
    }

    /// Produce the next version of this row with a replaced body.
    pub fn next_version(&self, body: Value) -> Self {
        Self {
            version: self.version + 1,
            body,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

impl From<SnapshotRow> for SnapshotDocument {
    fn from(row: SnapshotRow) -> Self {
        SnapshotDocument {
            organization: row.organization,
            snapshot_id: row.snapshot_id,
            experiment_id: row.experiment_id,
            version: row.version,
            body: row.body,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_row_new_starts_at_version_one() {
        let row = SnapshotRow::new("org_1", "snp_1", "exp_1", json!({"status": "running"}));
        assert_eq!(row.version, 1);
        assert_eq!(row.created_at, row.updated_at);
    }

    #[test]
    fn test_next_version_keeps_identity() {
        let row = SnapshotRow::new("org_1", "snp_1", "exp_1", json!({"status": "running"}));
        let next = row.next_version(json!({"status": "success"}));

        assert_eq!(next.version, 2);
        assert_eq!(next.snapshot_id, "snp_1");
        assert_eq!(next.created_at, row.created_at);
        assert_eq!(next.body["status"], "success");
    }

    #[test]
    fn test_row_converts_into_document() {
        let row = SnapshotRow::new("org_1", "snp_1", "exp_1", json!({}));
        let doc: SnapshotDocument = row.clone().into();
        assert_eq!(doc.organization, row.organization);
        assert_eq!(doc.version, 1);
    }
}
