//! Snapshot lifecycle: creation, loading and the single update entry point.
//!
//! Every mutation of a [`Snapshot`] goes through [`SnapshotLifecycle::update`],
//! which writes all mutable fields at once with optimistic versioning. A
//! version conflict triggers one reload and retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use exprun_state::{SnapshotDocument, SnapshotStore, StorageError};

use crate::domain::{
    AnalysisSettings, QueryPointer, QueryStatus, Result, ResultsError, Snapshot, SnapshotResult,
    SnapshotSettings, SnapshotStatus,
};

/// Body keys rewritten by every update.
const MUTABLE_FIELDS: &[&str] = &[
    "status",
    "queries",
    "runStarted",
    "error",
    "analyses",
    "unknownVariations",
    "multipleExposures",
    "health",
];

/// Overall run status as reported by the caller of [`SnapshotLifecycle::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Failed,
    Succeeded,
}

impl RunStatus {
    pub fn snapshot_status(self) -> SnapshotStatus {
        match self {
            RunStatus::Running => SnapshotStatus::Running,
            RunStatus::Failed => SnapshotStatus::Error,
            RunStatus::Succeeded => SnapshotStatus::Success,
        }
    }
}

impl From<QueryStatus> for RunStatus {
    fn from(status: QueryStatus) -> Self {
        match status {
            QueryStatus::Running => RunStatus::Running,
            QueryStatus::Failed => RunStatus::Failed,
            _ => RunStatus::Succeeded,
        }
    }
}

/// One state transition of a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub status: RunStatus,
    /// Replaces the stored query list when present.
    pub queries: Option<Vec<QueryPointer>>,
    pub run_started: Option<DateTime<Utc>>,
    /// Replaces analyses and computed fields when present.
    pub result: Option<SnapshotResult>,
    /// Replaces the stored error; `None` clears it.
    pub error: Option<String>,
}

impl SnapshotUpdate {
    pub fn new(status: RunStatus) -> Self {
        Self {
            status,
            queries: None,
            run_started: None,
            result: None,
            error: None,
        }
    }

    pub fn running(queries: Vec<QueryPointer>) -> Self {
        Self::new(RunStatus::Running).with_queries(queries)
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::new(RunStatus::Failed).with_error(error)
    }

    pub fn with_queries(mut self, queries: Vec<QueryPointer>) -> Self {
        self.queries = Some(queries);
        self
    }

    pub fn with_run_started(mut self, at: DateTime<Utc>) -> Self {
        self.run_started = Some(at);
        self
    }

    pub fn with_result(mut self, result: SnapshotResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Clone)]
pub struct SnapshotLifecycle {
    store: Arc<dyn SnapshotStore>,
}

impl SnapshotLifecycle {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Persist a new running snapshot with pending analyses.
    #[instrument(skip(self, settings, analyses), fields(experiment_id = %settings.experiment_id))]
    pub async fn create(
        &self,
        organization: &str,
        settings: SnapshotSettings,
        analyses: Vec<AnalysisSettings>,
    ) -> Result<Snapshot> {
        let id = format!("snp_{}", Uuid::new_v4().simple());
        let mut snapshot = Snapshot::new(organization, id, settings, analyses);
        let body = serde_json::to_value(&snapshot)?;
        let doc = self
            .store
            .insert(organization, &snapshot.id, &snapshot.experiment_id, body)
            .await?;
        snapshot.version = doc.version;
        debug!(snapshot_id = %snapshot.id, "snapshot created");
        Ok(snapshot)
    }

    pub async fn load(&self, organization: &str, snapshot_id: &str) -> Result<Snapshot> {
        match self.store.get(organization, snapshot_id).await? {
            Some(doc) => from_document(doc),
            None => Err(ResultsError::SnapshotNotFound {
                organization: organization.to_string(),
                snapshot_id: snapshot_id.to_string(),
            }),
        }
    }

    pub async fn latest_for_experiment(
        &self,
        organization: &str,
        experiment_id: &str,
    ) -> Result<Option<Snapshot>> {
        self.store
            .latest_for_experiment(organization, experiment_id)
            .await?
            .map(from_document)
            .transpose()
    }

    /// Persist `update` and apply it to `snapshot` once the write succeeds.
    ///
    /// Terminal snapshots reject further updates. On a version conflict the
    /// stored document is reloaded and the write is retried once against
    /// the fresh version.
    #[instrument(skip(self, snapshot, update), fields(snapshot_id = %snapshot.id, status = ?update.status))]
    pub async fn update(&self, snapshot: &mut Snapshot, update: SnapshotUpdate) -> Result<()> {
        if snapshot.status.is_terminal() {
            return Err(terminal(snapshot));
        }

        // The caller's snapshot only changes once the store accepts the write.
        let mut next = snapshot.clone();
        apply(&mut next, update);
        let fields = mutable_fields(&next)?;

        let doc = match self
            .store
            .update(
                &snapshot.organization,
                &snapshot.id,
                fields.clone(),
                Some(snapshot.version),
            )
            .await
        {
            Ok(doc) => doc,
            Err(StorageError::VersionConflict {
                expected, actual, ..
            }) => {
                warn!(expected, actual, "snapshot version conflict, retrying");
                let stored = self.load(&snapshot.organization, &snapshot.id).await?;
                if stored.status.is_terminal() {
                    return Err(terminal(&stored));
                }
                self.store
                    .update(
                        &snapshot.organization,
                        &snapshot.id,
                        fields,
                        Some(stored.version),
                    )
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        next.version = doc.version;
        *snapshot = next;
        Ok(())
    }
}

fn apply(snapshot: &mut Snapshot, update: SnapshotUpdate) {
    snapshot.status = update.status.snapshot_status();
    if let Some(queries) = update.queries {
        snapshot.queries = queries;
    }
    if let Some(at) = update.run_started {
        snapshot.run_started = Some(at);
    }
    if let Some(result) = update.result {
        snapshot.analyses = result.analyses;
        snapshot.unknown_variations = result.unknown_variations;
        snapshot.multiple_exposures = result.multiple_exposures;
        snapshot.health = result.health;
    }
    snapshot.error = update.error;
}

fn mutable_fields(snapshot: &Snapshot) -> Result<Map<String, Value>> {
    let Value::Object(mut body) = serde_json::to_value(snapshot)? else {
        return Ok(Map::new());
    };
    Ok(MUTABLE_FIELDS
        .iter()
        .map(|key| {
            let value = body.remove(*key).unwrap_or(Value::Null);
            (key.to_string(), value)
        })
        .collect())
}

fn from_document(doc: SnapshotDocument) -> Result<Snapshot> {
    let mut snapshot: Snapshot = serde_json::from_value(doc.body)?;
    snapshot.version = doc.version;
    Ok(snapshot)
}

fn terminal(snapshot: &Snapshot) -> ResultsError {
    ResultsError::SnapshotTerminal {
        snapshot_id: snapshot.id.clone(),
        status: snapshot.status.to_string(),
    }
}
