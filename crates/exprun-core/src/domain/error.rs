//! Error taxonomy for results runs.

use exprun_state::StorageError;

/// Failures reported by a data-source integration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IntegrationError {
    #[error("{0}")]
    Query(String),

    #[error("operation not supported by this data source: {0}")]
    Unsupported(String),
}

/// Why a single dispatched query ended in `failed`.
///
/// The display string is what gets stored on the query pointer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Integration(#[from] IntegrationError),

    #[error("failed to process rows: {0}")]
    Processing(String),

    #[error("dependency {dependency} did not succeed")]
    DependencyFailed { dependency: String },

    #[error("query timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("query task aborted: {0}")]
    Aborted(String),
}

impl From<serde_json::Error> for QueryError {
    fn from(e: serde_json::Error) -> Self {
        QueryError::Processing(e.to_string())
    }
}

/// Caller mistakes when registering queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("query {name} is already registered in this run")]
    DuplicateQuery { name: String },

    #[error("query {name} depends on unregistered query {dependency}")]
    UnknownDependency { name: String, dependency: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis engine error: {0}")]
    Engine(String),

    #[error("query {query} has no usable rows")]
    MissingData { query: String },
}

/// Errors surfaced by the results orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("Experiment must have at least 1 metric selected.")]
    NoMetricsSelected,

    #[error("Unable to generate table; table path generator not specified.")]
    TablePathUnavailable,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("all {count} queries failed; first error: {first_error}")]
    AllQueriesFailed { count: usize, first_error: String },

    #[error("snapshot run cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("snapshot not found: {organization}/{snapshot_id}")]
    SnapshotNotFound {
        organization: String,
        snapshot_id: String,
    },

    #[error("snapshot {snapshot_id} is already {status}")]
    SnapshotTerminal { snapshot_id: String, status: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid fixture: {0}")]
    Fixture(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResultsError {
    /// Errors raised before any query is dispatched.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ResultsError::NoMetricsSelected
                | ResultsError::TablePathUnavailable
                | ResultsError::Dispatch(_)
        )
    }
}

/// Result type for exprun orchestration operations.
pub type Result<T> = std::result::Result<T, ResultsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_messages_are_user_facing() {
        assert_eq!(
            ResultsError::NoMetricsSelected.to_string(),
            "Experiment must have at least 1 metric selected."
        );
        assert_eq!(
            ResultsError::TablePathUnavailable.to_string(),
            "Unable to generate table; table path generator not specified."
        );
        assert!(ResultsError::NoMetricsSelected.is_precondition());
    }

    #[test]
    fn query_error_display() {
        let err = QueryError::DependencyFailed {
            dependency: "units_1".into(),
        };
        assert_eq!(err.to_string(), "dependency units_1 did not succeed");

        let err: QueryError = IntegrationError::Query("syntax error at line 3".into()).into();
        assert_eq!(err.to_string(), "syntax error at line 3");

        assert_eq!(
            QueryError::Timeout { after_ms: 1500 }.to_string(),
            "query timed out after 1500ms"
        );
    }

    #[test]
    fn dispatch_error_converts() {
        let err: ResultsError = DispatchError::DuplicateQuery {
            name: "traffic".into(),
        }
        .into();
        assert!(err.to_string().contains("already registered"));
        assert!(err.is_precondition());
    }

    #[test]
    fn storage_error_converts() {
        let err: ResultsError = StorageError::Backend("down".into()).into();
        assert!(err.to_string().starts_with("storage error"));
        assert!(!err.is_precondition());
    }
}
