//! Trait contract tests for SnapshotStore.
//!
//! Every check runs against the in-memory fake and the SurrealDB store
//! (`mem://`). Any conforming implementation must pass these.

use std::time::Duration;

use exprun_state::fakes::MemorySnapshotStore;
use exprun_state::storage_traits::*;
use exprun_state::{StorageError, SurrealSnapshotStore};
use serde_json::{json, Map, Value};

async fn stores() -> Vec<(&'static str, Box<dyn SnapshotStore>)> {
    let memory: Box<dyn SnapshotStore> = Box::new(MemorySnapshotStore::new());
    let surreal: Box<dyn SnapshotStore> =
        Box::new(SurrealSnapshotStore::in_memory().await.unwrap());
    vec![("memory", memory), ("surreal", surreal)]
}

fn fields(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn insert_then_get_round_trip() {
    for (name, store) in stores().await {
        let created = store
            .insert("org_1", "snp_1", "exp_1", json!({"status": "running"}))
            .await
            .unwrap();
        assert_eq!(created.version, 1, "{name}");

        let fetched = store.get("org_1", "snp_1").await.unwrap().unwrap();
        assert_eq!(fetched.experiment_id, "exp_1", "{name}");
        assert_eq!(fetched.body["status"], "running", "{name}");
    }
}

#[tokio::test]
async fn get_missing_is_none() {
    for (name, store) in stores().await {
        assert!(store.get("org_1", "nope").await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn snapshots_are_scoped_by_organization() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_1", "exp_1", json!({}))
            .await
            .unwrap();
        assert!(store.get("org_2", "snp_1").await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn duplicate_insert_is_rejected() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_1", "exp_1", json!({}))
            .await
            .unwrap();
        let err = store
            .insert("org_1", "snp_1", "exp_1", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }), "{name}");
    }
}

#[tokio::test]
async fn insert_rejects_non_object_body() {
    for (name, store) in stores().await {
        let err = store
            .insert("org_1", "snp_1", "exp_1", json!("oops"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidBody { .. }), "{name}");
    }
}

#[tokio::test]
async fn update_merges_fields_and_bumps_version() {
    for (name, store) in stores().await {
        store
            .insert(
                "org_1",
                "snp_1",
                "exp_1",
                json!({"status": "running", "queries": []}),
            )
            .await
            .unwrap();

        let updated = store
            .update(
                "org_1",
                "snp_1",
                fields(&[("status", json!("success"))]),
                Some(1),
            )
            .await
            .unwrap();

        assert_eq!(updated.version, 2, "{name}");
        assert_eq!(updated.body["status"], "success", "{name}");
        assert_eq!(updated.body["queries"], json!([]), "{name}");
    }
}

#[tokio::test]
async fn update_with_stale_version_conflicts() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_1", "exp_1", json!({"status": "running"}))
            .await
            .unwrap();
        store
            .update("org_1", "snp_1", fields(&[("error", json!("x"))]), Some(1))
            .await
            .unwrap();

        let err = store
            .update("org_1", "snp_1", fields(&[("error", json!("y"))]), Some(1))
            .await
            .unwrap_err();
        match err {
            StorageError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1, "{name}");
                assert_eq!(actual, 2, "{name}");
            }
            other => panic!("{name}: expected VersionConflict, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn update_without_expected_version_is_last_write_wins() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_1", "exp_1", json!({"status": "running"}))
            .await
            .unwrap();
        store
            .update("org_1", "snp_1", fields(&[("status", json!("error"))]), None)
            .await
            .unwrap();
        let last = store
            .update("org_1", "snp_1", fields(&[("status", json!("success"))]), None)
            .await
            .unwrap();
        assert_eq!(last.body["status"], "success", "{name}");
        assert_eq!(last.version, 3, "{name}");
    }
}

#[tokio::test]
async fn repeated_update_is_idempotent_on_body() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_1", "exp_1", json!({"status": "running"}))
            .await
            .unwrap();
        let change = fields(&[("status", json!("success")), ("error", Value::Null)]);
        let first = store
            .update("org_1", "snp_1", change.clone(), None)
            .await
            .unwrap();
        let second = store.update("org_1", "snp_1", change, None).await.unwrap();
        assert_eq!(first.body, second.body, "{name}");
    }
}

#[tokio::test]
async fn update_missing_snapshot_is_not_found() {
    for (name, store) in stores().await {
        let err = store
            .update("org_1", "ghost", Map::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{name}");
    }
}

#[tokio::test]
async fn latest_for_experiment_returns_newest() {
    for (name, store) in stores().await {
        store
            .insert("org_1", "snp_old", "exp_1", json!({}))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store
            .insert("org_1", "snp_new", "exp_1", json!({}))
            .await
            .unwrap();
        store
            .insert("org_1", "snp_other", "exp_2", json!({}))
            .await
            .unwrap();

        let latest = store
            .latest_for_experiment("org_1", "exp_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.snapshot_id, "snp_new", "{name}");

        assert!(store
            .latest_for_experiment("org_9", "exp_1")
            .await
            .unwrap()
            .is_none());
    }
}
