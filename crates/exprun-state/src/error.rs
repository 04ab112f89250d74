//! Error types for exprun-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors returned by [`crate::SnapshotStore`] implementations
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("snapshot not found: {organization}/{snapshot_id}")]
    NotFound {
        organization: String,
        snapshot_id: String,
    },

    #[error("snapshot already exists: {organization}/{snapshot_id}")]
    AlreadyExists {
        organization: String,
        snapshot_id: String,
    },

    #[error("version conflict on snapshot {snapshot_id}: expected {expected}, found {actual}")]
    VersionConflict {
        snapshot_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("snapshot body must be a JSON object, got {kind}")]
    InvalidBody { kind: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_conflict_displays_versions() {
        let err = StorageError::VersionConflict {
            snapshot_id: "snp_1".to_string(),
            expected: 3,
            actual: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("snp_1"));
        assert!(msg.contains("expected 3"));
        assert!(msg.contains("found 4"));
    }

    #[test]
    fn test_not_found_displays_key() {
        let err = StorageError::NotFound {
            organization: "org_a".to_string(),
            snapshot_id: "snp_9".to_string(),
        };
        assert!(err.to_string().contains("org_a/snp_9"));
    }
}
