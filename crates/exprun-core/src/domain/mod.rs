//! Domain models for exprun.
//!
//! Canonical definitions for the core entities:
//! - `SnapshotSettings`: Immutable inputs of one results run
//! - `QueryPointer` / `QueryMap`: Dispatched queries and their outcomes
//! - `Snapshot`: The persisted, versioned results entity
//! - `SnapshotResult`: Analyses plus traffic health, as consumed by the UI

pub mod error;
pub mod query;
pub mod settings;
pub mod snapshot;

pub use error::{AnalysisError, DispatchError, IntegrationError, QueryError, ResultsError, Result};
pub use query::{QueryMap, QueryPayload, QueryPointer, QueryStatus, TrafficRow, VariationKey};
pub use settings::{
    AnalysisSettings, Dimension, DimensionKind, DimensionSpec, MetricDefinition, PValueCorrection,
    Segment, SnapshotSettings, StatsEngine, Variation,
};
pub use snapshot::{
    Analysis, AnalysisDimension, AnalysisStatus, AnalysisVariation, MetricSummary, Snapshot,
    SnapshotHealth, SnapshotResult, SnapshotStatus, SnapshotTraffic, TrafficDimension,
};
