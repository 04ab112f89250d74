//! End-to-end results runs over fixture data sources.

use std::sync::Arc;
use std::time::Duration;

use exprun_core::fixture::{FixtureIntegration, RunFixture};
use exprun_core::{
    AnalysisStatus, Collaborators, ExperimentResultsRunner, MemorySnapshotStore, QueryStatus,
    RunRequest, RunnerConfig, SnapshotStatus, SnapshotStore, SourceIntegration,
    SurrealSnapshotStore,
};
use serde_json::{json, Value};

fn separated_fixture() -> Value {
    json!({
        "organization": "org_1",
        "settings": {
            "experimentId": "exp_checkout",
            "variations": [{"id": "0", "weight": 0.5}, {"id": "1", "weight": 0.5}],
            "goalMetrics": ["met_conv"],
            "guardrailMetrics": ["met_rev"],
            "exposureQueryId": "user_id"
        },
        "analyses": [{"statsEngine": "bayesian"}, {"statsEngine": "frequentist"}],
        "variationNames": ["Control", "Treatment"],
        "metrics": [
            {"id": "met_conv", "name": "Conversion"},
            {"id": "met_rev", "name": "Revenue"}
        ],
        "source": {
            "properties": {"supportsWritingTables": false, "separateExperimentResultQueries": true},
            "rows": {
                "metric:met_conv": [
                    {"variation": "0", "users": 50, "count": 50, "main_sum": 10, "main_sum_squares": 10},
                    {"variation": "1", "users": 60, "count": 60, "main_sum": 15, "main_sum_squares": 15}
                ],
                "metric:met_rev": [
                    {"variation": "0", "users": 50, "count": 50, "main_sum": 500, "main_sum_squares": 9000},
                    {"variation": "1", "users": 60, "count": 60, "main_sum": 720, "main_sum_squares": 12000}
                ],
                "traffic": [
                    {"variation": "0", "dimension_name": "dim_exposure_date", "dimension_value": "2024-01-01", "units": 20},
                    {"variation": "1", "dimension_name": "dim_exposure_date", "dimension_value": "2024-01-01", "units": 25},
                    {"variation": "0", "dimension_name": "dim_exposure_date", "dimension_value": "2024-01-02", "units": 30},
                    {"variation": "1", "dimension_name": "dim_exposure_date", "dimension_value": "2024-01-02", "units": 35}
                ]
            }
        }
    })
}

fn legacy_fixture() -> Value {
    json!({
        "organization": "org_1",
        "settings": {
            "experimentId": "exp_checkout",
            "variations": [{"id": "0", "weight": 0.5}, {"id": "1", "weight": 0.5}],
            "goalMetrics": ["met_conv"]
        },
        "metrics": [{"id": "met_conv"}],
        "source": {
            "rows": {
                "results": [
                    {"dimension": "", "variation": "0", "users": 50, "metrics": [
                        {"metric": "met_conv", "count": 50, "main_sum": 10, "main_sum_squares": 10}
                    ]},
                    {"dimension": "", "variation": "1", "users": 50, "metrics": [
                        {"metric": "met_conv", "count": 50, "main_sum": 12, "main_sum_squares": 12}
                    ]},
                    {"dimension": "", "variation": "2", "users": 3, "metrics": []}
                ]
            }
        }
    })
}

struct Harness {
    runner: ExperimentResultsRunner,
    request: RunRequest,
    integration: Arc<FixtureIntegration>,
    store: Arc<dyn SnapshotStore>,
}

fn harness(fixture: Value, store: Arc<dyn SnapshotStore>, config: RunnerConfig) -> Harness {
    let fixture = RunFixture::from_json(&fixture.to_string()).unwrap();
    let (request, integration, catalog) = fixture.into_parts();
    let runner = ExperimentResultsRunner::new(
        Arc::clone(&store),
        integration.clone(),
        Collaborators::from_shared(catalog),
    )
    .with_config(config);
    Harness {
        runner,
        request,
        integration,
        store,
    }
}

fn memory() -> Arc<dyn SnapshotStore> {
    Arc::new(MemorySnapshotStore::new())
}

// ============================================================================
// Successful runs
// ============================================================================

#[tokio::test]
async fn separated_run_succeeds_with_health() {
    let h = harness(separated_fixture(), memory(), RunnerConfig::default());
    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Success);
    assert!(snapshot.error.is_none());
    assert!(snapshot.run_started.is_some());

    let names: Vec<&str> = snapshot.queries.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(names, vec!["met_conv", "met_rev", "traffic"]);
    assert!(snapshot
        .queries
        .iter()
        .all(|q| q.status == QueryStatus::Succeeded));

    assert_eq!(snapshot.analyses.len(), 2);
    assert!(snapshot
        .analyses
        .iter()
        .all(|a| a.status == AnalysisStatus::Success));
    let variations = &snapshot.analyses[0].results[0].variations;
    assert_eq!(variations[1].metrics["met_rev"].mean, 12.0);

    let health = snapshot.health.as_ref().expect("health");
    assert_eq!(health.traffic.overall.variation_units, vec![50.0, 60.0]);
    assert!((health.traffic.overall.srm - 0.340_356).abs() < 1e-5);
    assert_eq!(health.traffic.dimension["dim_exposure_date"].len(), 2);

    let stored = h
        .runner
        .lifecycle()
        .load("org_1", &snapshot.id)
        .await
        .unwrap();
    assert_eq!(stored.status, SnapshotStatus::Success);
    assert_eq!(stored.health, snapshot.health);
    assert_eq!(stored.version, snapshot.version);
    // payloads stay in memory; only pointer metadata is persisted
    assert!(stored.queries.iter().all(|q| q.result.is_none()));
}

#[tokio::test]
async fn legacy_run_reports_unknown_variations() {
    let h = harness(legacy_fixture(), memory(), RunnerConfig::default());
    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Success);
    assert_eq!(snapshot.queries.len(), 1);
    assert_eq!(snapshot.queries[0].name, "results");
    assert_eq!(snapshot.unknown_variations, vec!["2".to_string()]);
    assert!(snapshot.health.is_none());
    assert_eq!(h.integration.calls(), vec!["results"]);
}

#[tokio::test]
async fn empty_analysis_list_gets_default_analysis() {
    let mut fixture = legacy_fixture();
    fixture["analyses"] = json!([]);
    let h = harness(fixture, memory(), RunnerConfig::default());
    let snapshot = h.runner.run(h.request.clone()).await.unwrap();
    assert_eq!(snapshot.analyses.len(), 1);
    assert_eq!(snapshot.analyses[0].status, AnalysisStatus::Success);
}

#[tokio::test]
async fn run_persists_to_surreal_store() {
    let store: Arc<dyn SnapshotStore> = Arc::new(SurrealSnapshotStore::in_memory().await.unwrap());
    let h = harness(separated_fixture(), store, RunnerConfig::default());
    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    let doc = h
        .store
        .get("org_1", &snapshot.id)
        .await
        .unwrap()
        .expect("stored");
    assert_eq!(doc.body["status"], "success");
    assert_eq!(doc.version, snapshot.version);
    assert_eq!(doc.experiment_id, "exp_checkout");
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn precondition_failure_persists_error_without_queries() {
    let mut fixture = separated_fixture();
    fixture["settings"]["goalMetrics"] = json!(["met_unknown"]);
    fixture["settings"]["guardrailMetrics"] = json!([]);
    let h = harness(fixture, memory(), RunnerConfig::default());

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("Experiment must have at least 1 metric selected.")
    );
    assert!(snapshot.queries.is_empty());
    assert!(snapshot.health.is_none());
    assert!(h.integration.calls().is_empty());
}

#[tokio::test]
async fn partial_query_failure_still_analyzes() {
    let mut fixture = separated_fixture();
    fixture["source"]["failures"] = json!({"metric:met_rev": "column revenue not found"});
    let h = harness(fixture, memory(), RunnerConfig::default());

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Success);
    let rev = snapshot.queries.iter().find(|q| q.name == "met_rev").unwrap();
    assert_eq!(rev.status, QueryStatus::Failed);
    assert_eq!(rev.error.as_deref(), Some("column revenue not found"));
    let variations = &snapshot.analyses[0].results[0].variations;
    assert!(variations[0].metrics.contains_key("met_conv"));
    assert!(!variations[0].metrics.contains_key("met_rev"));
}

#[tokio::test]
async fn all_queries_failing_ends_in_error() {
    let mut fixture = separated_fixture();
    fixture["source"]["failures"] = json!({
        "metric:met_conv": "warehouse offline",
        "metric:met_rev": "warehouse offline",
        "traffic": "warehouse offline"
    });
    let h = harness(fixture, memory(), RunnerConfig::default());

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Error);
    let error = snapshot.error.as_deref().unwrap();
    assert!(error.starts_with("all 3 queries failed"), "{error}");
    assert!(error.contains("warehouse offline"));
    assert!(snapshot
        .analyses
        .iter()
        .all(|a| a.status == AnalysisStatus::Running));
}

#[tokio::test]
async fn analysis_failure_ends_in_error_but_keeps_other_results() {
    // only traffic succeeds: the summary engine has no metric rows
    let mut fixture = separated_fixture();
    fixture["source"]["failures"] = json!({
        "metric:met_conv": "timeout",
        "metric:met_rev": "timeout"
    });
    let h = harness(fixture, memory(), RunnerConfig::default());

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("query met_conv has no usable rows")
    );
    assert!(snapshot.health.is_some());
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn run_deadline_cancels_in_flight_queries() {
    let mut fixture = separated_fixture();
    fixture["source"]["delaysMs"] = json!({"traffic": 60_000});
    let config = RunnerConfig::default().with_run_timeout(Duration::from_secs(5));
    let h = harness(fixture, memory(), config);

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Error);
    assert_eq!(
        snapshot.error.as_deref(),
        Some("snapshot run cancelled: run deadline of 5000ms exceeded")
    );
    let traffic = snapshot.queries.iter().find(|q| q.name == "traffic").unwrap();
    assert_eq!(traffic.status, QueryStatus::Failed);
    assert_eq!(traffic.error.as_deref(), Some("cancelled"));
    let conv = snapshot.queries.iter().find(|q| q.name == "met_conv").unwrap();
    assert_eq!(conv.status, QueryStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn query_deadline_fails_only_the_slow_query() {
    let mut fixture = separated_fixture();
    fixture["source"]["delaysMs"] = json!({"metric:met_rev": 30_000});
    let config = RunnerConfig::default().with_query_timeout(Duration::from_secs(2));
    let h = harness(fixture, memory(), config);

    let snapshot = h.runner.run(h.request.clone()).await.unwrap();

    assert_eq!(snapshot.status, SnapshotStatus::Success);
    let rev = snapshot.queries.iter().find(|q| q.name == "met_rev").unwrap();
    assert_eq!(rev.error.as_deref(), Some("query timed out after 2000ms"));
}

// ============================================================================
// Fixtures
// ============================================================================

#[tokio::test]
async fn fixture_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.json");
    std::fs::write(&path, separated_fixture().to_string()).unwrap();

    let fixture = RunFixture::load(&path).await.unwrap();
    let (request, integration, catalog) = fixture.into_parts();

    assert_eq!(request.organization, "org_1");
    assert_eq!(request.variation_names, vec!["Control", "Treatment"]);
    assert_eq!(request.analyses.len(), 2);
    assert_eq!(request.metrics.len(), 2);
    assert!(integration.source_properties().separate_experiment_result_queries);
    assert!(catalog.features.is_empty());
}

#[tokio::test]
async fn variation_names_default_to_ids() {
    let fixture = RunFixture::from_json(&legacy_fixture().to_string()).unwrap();
    let (request, _, _) = fixture.into_parts();
    assert_eq!(request.variation_names, vec!["0", "1"]);
}
