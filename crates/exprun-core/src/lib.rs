//! exprun core library
//!
//! Orchestrates experiment results runs: plans and dispatches warehouse
//! queries in dependency order, aggregates analyses and traffic health over
//! the completed query map, and persists a versioned snapshot.
//!
//! ## Layer 1 - Orchestration
//!
//! - [`dispatcher`]: dependency-ordered query tasks with per-query deadlines
//! - [`planner`]: separated vs legacy query plans for a data source
//! - [`aggregator`]: concurrent analyses, exposure audit, traffic health
//! - [`lifecycle`]: snapshot status transitions with optimistic versioning
//! - [`runner`]: the end-to-end run with a whole-run deadline

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod engine;
pub mod fixture;
pub mod health;
pub mod integration;
pub mod legacy;
pub mod lifecycle;
pub mod metrics;
pub mod obs;
pub mod planner;
pub mod runner;
pub mod stats;
pub mod telemetry;

pub use domain::{
    Analysis, AnalysisSettings, AnalysisStatus, Dimension, DimensionKind, DimensionSpec,
    MetricDefinition, QueryMap, QueryPayload, QueryPointer, QueryStatus, Result, ResultsError,
    Segment, Snapshot, SnapshotResult, SnapshotSettings, SnapshotStatus, TrafficRow, Variation,
};

pub use aggregator::{AggregateOutcome, ExposureAudit, ResultAggregator, MULTIPLE_EXPOSURE_MARKER};
pub use catalog::StaticCatalog;
pub use config::{ConfigError, RunnerConfig};
pub use dispatcher::{keep_rows, QueryDispatcher, QuerySpec};
pub use engine::{AnalysisEngine, AnalysisInput, AnalysisOutput, SummaryEngine};
pub use fixture::{FixtureIntegration, FixtureSource, RunFixture};
pub use health::{compute_traffic, EXPOSURE_DATE_DIMENSION, OVERALL_BUCKET};
pub use integration::{
    DimensionCatalog, EntitlementPolicy, MetricCatalog, SegmentCatalog, SourceIntegration,
    SourceProperties, PIPELINE_MODE_FEATURE,
};
pub use legacy::{process_legacy_rows, LegacyResults, LegacyRow};
pub use lifecycle::{RunStatus, SnapshotLifecycle, SnapshotUpdate};
pub use planner::{
    start_queries, Collaborators, ResultsQueryParams, LEGACY_QUERY_NAME, TRAFFIC_QUERY_NAME,
};
pub use runner::{ExperimentResultsRunner, RunRequest};
pub use stats::check_srm;

pub use exprun_state::fakes::MemorySnapshotStore;
pub use exprun_state::{SnapshotStore, SurrealSnapshotStore};
