//! The persisted snapshot entity and the result shape it carries.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::QueryPointer;
use super::settings::{AnalysisSettings, SnapshotSettings};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Running,
    Success,
    Error,
}

impl SnapshotStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SnapshotStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotStatus::Running => "running",
            SnapshotStatus::Success => "success",
            SnapshotStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Running,
    Success,
    Error,
}

/// Descriptive statistics of one metric for one variation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub count: f64,
    pub value: f64,
    pub mean: f64,
    pub stddev: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalysisVariation {
    pub users: f64,
    pub metrics: BTreeMap<String, MetricSummary>,
}

/// Results of one analysis for one dimension value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisDimension {
    pub name: String,
    pub srm: f64,
    pub variations: Vec<AnalysisVariation>,
}

/// One configured analysis and its output slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    pub settings: AnalysisSettings,
    pub status: AnalysisStatus,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub results: Vec<AnalysisDimension>,
}

impl Analysis {
    pub fn pending(settings: AnalysisSettings) -> Self {
        Self {
            settings,
            status: AnalysisStatus::Running,
            error: None,
            results: Vec::new(),
        }
    }
}

/// Unit counts per variation for one traffic bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrafficDimension {
    pub name: String,
    pub srm: f64,
    pub variation_units: Vec<f64>,
}

impl TrafficDimension {
    pub fn empty(name: impl Into<String>, variations: usize) -> Self {
        Self {
            name: name.into(),
            srm: 0.0,
            variation_units: vec![0.0; variations],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotTraffic {
    pub overall: TrafficDimension,
    /// Dimension name to its value buckets, values in first-seen order.
    pub dimension: BTreeMap<String, Vec<TrafficDimension>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotHealth {
    pub traffic: SnapshotTraffic,
}

/// What a finished run produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResult {
    pub unknown_variations: Vec<String>,
    pub multiple_exposures: u64,
    pub analyses: Vec<Analysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<SnapshotHealth>,
}

/// Persisted results entity, keyed by `(organization, id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub organization: String,
    pub id: String,
    pub experiment_id: String,
    pub settings: SnapshotSettings,
    pub analyses: Vec<Analysis>,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub queries: Vec<QueryPointer>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub run_started: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unknown_variations: Vec<String>,
    #[serde(default)]
    pub multiple_exposures: u64,
    #[serde(default)]
    pub health: Option<SnapshotHealth>,
    pub date_created: DateTime<Utc>,
    /// Persistence version, owned by the store.
    #[serde(skip)]
    pub version: u64,
}

impl Snapshot {
    pub fn new(
        organization: impl Into<String>,
        id: impl Into<String>,
        settings: SnapshotSettings,
        analyses: Vec<AnalysisSettings>,
    ) -> Self {
        Self {
            organization: organization.into(),
            id: id.into(),
            experiment_id: settings.experiment_id.clone(),
            settings,
            analyses: analyses.into_iter().map(Analysis::pending).collect(),
            status: SnapshotStatus::Running,
            queries: Vec::new(),
            error: None,
            run_started: None,
            unknown_variations: Vec::new(),
            multiple_exposures: 0,
            health: None,
            date_created: Utc::now(),
            version: 0,
        }
    }

    /// The result fields of this snapshot, in the exposed shape.
    pub fn result(&self) -> SnapshotResult {
        SnapshotResult {
            unknown_variations: self.unknown_variations.clone(),
            multiple_exposures: self.multiple_exposures,
            analyses: self.analyses.clone(),
            health: self.health.clone(),
        }
    }
}
