//! Snapshot lifecycle: creation, status transitions, optimistic versioning.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use exprun_core::lifecycle::{RunStatus, SnapshotLifecycle, SnapshotUpdate};
use exprun_core::{
    AnalysisSettings, MemorySnapshotStore, QueryPointer, ResultsError, SnapshotResult,
    SnapshotSettings, SnapshotStatus, SnapshotStore, Variation,
};
use exprun_state::{SnapshotDocument, StorageError, StorageResult};
use serde_json::{json, Map, Value};

fn settings() -> SnapshotSettings {
    SnapshotSettings {
        experiment_id: "exp_checkout".into(),
        variations: vec![Variation::new("0", 0.5), Variation::new("1", 0.5)],
        goal_metrics: vec!["met_conv".into()],
        guardrail_metrics: vec![],
        activation_metric: None,
        segment: None,
        dimensions: vec![],
        exposure_query_id: "user_id".into(),
    }
}

/// Store wrapper that bumps the stored version behind the caller's back
/// before the first `interfere` versioned updates.
struct ConcurrentWriter {
    inner: MemorySnapshotStore,
    interfere: AtomicUsize,
    updates: AtomicUsize,
}

impl ConcurrentWriter {
    fn new(interfere: usize) -> Self {
        Self {
            inner: MemorySnapshotStore::new(),
            interfere: AtomicUsize::new(interfere),
            updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SnapshotStore for ConcurrentWriter {
    async fn insert(
        &self,
        organization: &str,
        snapshot_id: &str,
        experiment_id: &str,
        body: Value,
    ) -> StorageResult<SnapshotDocument> {
        self.inner
            .insert(organization, snapshot_id, experiment_id, body)
            .await
    }

    async fn get(
        &self,
        organization: &str,
        snapshot_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        self.inner.get(organization, snapshot_id).await
    }

    async fn update(
        &self,
        organization: &str,
        snapshot_id: &str,
        fields: Map<String, Value>,
        expected_version: Option<u64>,
    ) -> StorageResult<SnapshotDocument> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let remaining = self.interfere.load(Ordering::SeqCst);
        if remaining > 0 && expected_version.is_some() {
            self.interfere.store(remaining - 1, Ordering::SeqCst);
            let mut touch = Map::new();
            touch.insert("touchedBy".into(), json!("other-worker"));
            self.inner
                .update(organization, snapshot_id, touch, None)
                .await?;
        }
        self.inner
            .update(organization, snapshot_id, fields, expected_version)
            .await
    }

    async fn latest_for_experiment(
        &self,
        organization: &str,
        experiment_id: &str,
    ) -> StorageResult<Option<SnapshotDocument>> {
        self.inner
            .latest_for_experiment(organization, experiment_id)
            .await
    }
}

// ============================================================================
// Create / load
// ============================================================================

#[tokio::test]
async fn create_persists_running_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    let lifecycle = SnapshotLifecycle::new(store.clone());

    let snapshot = lifecycle
        .create("org_1", settings(), vec![AnalysisSettings::default()])
        .await
        .unwrap();

    assert!(snapshot.id.starts_with("snp_"));
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.status, SnapshotStatus::Running);
    assert_eq!(store.len(), 1);

    let loaded = lifecycle.load("org_1", &snapshot.id).await.unwrap();
    assert_eq!(loaded, snapshot);
}

#[tokio::test]
async fn load_missing_is_not_found() {
    let lifecycle = SnapshotLifecycle::new(Arc::new(MemorySnapshotStore::new()));
    let err = lifecycle.load("org_1", "snp_none").await.unwrap_err();
    assert!(matches!(err, ResultsError::SnapshotNotFound { .. }));
}

#[tokio::test]
async fn latest_for_experiment_returns_newest() {
    let lifecycle = SnapshotLifecycle::new(Arc::new(MemorySnapshotStore::new()));
    let _first = lifecycle.create("org_1", settings(), vec![]).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let second = lifecycle.create("org_1", settings(), vec![]).await.unwrap();

    let latest = lifecycle
        .latest_for_experiment("org_1", "exp_checkout")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, second.id);
    assert!(lifecycle
        .latest_for_experiment("org_2", "exp_checkout")
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn update_persists_and_bumps_version() {
    let lifecycle = SnapshotLifecycle::new(Arc::new(MemorySnapshotStore::new()));
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();
    let started = Utc::now();

    lifecycle
        .update(
            &mut snapshot,
            SnapshotUpdate::running(vec![QueryPointer::queued("traffic", "SELECT", vec![])])
                .with_run_started(started),
        )
        .await
        .unwrap();
    assert_eq!(snapshot.version, 2);

    let stored = lifecycle.load("org_1", &snapshot.id).await.unwrap();
    assert_eq!(stored.queries.len(), 1);
    assert_eq!(stored.run_started, Some(started));
    assert_eq!(stored.status, SnapshotStatus::Running);
}

#[tokio::test]
async fn success_writes_result_and_clears_error() {
    let lifecycle = SnapshotLifecycle::new(Arc::new(MemorySnapshotStore::new()));
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();

    lifecycle
        .update(
            &mut snapshot,
            SnapshotUpdate::new(RunStatus::Running).with_error("transient"),
        )
        .await
        .unwrap();

    let result = SnapshotResult {
        unknown_variations: vec!["2".into()],
        multiple_exposures: 4,
        analyses: vec![],
        health: None,
    };
    lifecycle
        .update(
            &mut snapshot,
            SnapshotUpdate::new(RunStatus::Succeeded).with_result(result),
        )
        .await
        .unwrap();

    let stored = lifecycle.load("org_1", &snapshot.id).await.unwrap();
    assert_eq!(stored.status, SnapshotStatus::Success);
    assert!(stored.error.is_none());
    assert_eq!(stored.unknown_variations, vec!["2".to_string()]);
    assert_eq!(stored.multiple_exposures, 4);
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn terminal_snapshot_rejects_updates() {
    let lifecycle = SnapshotLifecycle::new(Arc::new(MemorySnapshotStore::new()));
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();
    lifecycle
        .update(&mut snapshot, SnapshotUpdate::failed("no metrics"))
        .await
        .unwrap();

    let err = lifecycle
        .update(&mut snapshot, SnapshotUpdate::new(RunStatus::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(err, ResultsError::SnapshotTerminal { .. }));

    let stored = lifecycle.load("org_1", &snapshot.id).await.unwrap();
    assert_eq!(stored.status, SnapshotStatus::Error);
    assert_eq!(stored.error.as_deref(), Some("no metrics"));
}

#[tokio::test]
async fn version_conflict_retries_once_after_reload() {
    let store = Arc::new(ConcurrentWriter::new(1));
    let lifecycle = SnapshotLifecycle::new(store.clone());
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();

    lifecycle
        .update(&mut snapshot, SnapshotUpdate::new(RunStatus::Succeeded))
        .await
        .unwrap();

    // interfering write, rejected write, retried write
    assert_eq!(snapshot.version, 3);
    assert_eq!(store.updates.load(Ordering::SeqCst), 2);

    let doc = store.get("org_1", &snapshot.id).await.unwrap().unwrap();
    assert_eq!(doc.body["status"], "success");
    assert_eq!(doc.body["touchedBy"], "other-worker");
}

#[tokio::test]
async fn second_conflict_is_reported() {
    let store = Arc::new(ConcurrentWriter::new(2));
    let lifecycle = SnapshotLifecycle::new(store);
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();

    let err = lifecycle
        .update(&mut snapshot, SnapshotUpdate::new(RunStatus::Succeeded))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ResultsError::Storage(StorageError::VersionConflict { .. })
    ));
}

#[tokio::test]
async fn failed_write_leaves_snapshot_unchanged() {
    let store = Arc::new(ConcurrentWriter::new(2));
    let lifecycle = SnapshotLifecycle::new(store);
    let mut snapshot = lifecycle.create("org_1", settings(), vec![]).await.unwrap();
    let before = snapshot.clone();

    lifecycle
        .update(&mut snapshot, SnapshotUpdate::failed("warehouse down"))
        .await
        .unwrap_err();

    assert_eq!(snapshot, before);
    assert_eq!(snapshot.status, SnapshotStatus::Running);
    assert!(snapshot.error.is_none());
}
