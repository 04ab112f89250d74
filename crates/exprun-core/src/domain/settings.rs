//! Run settings and the catalog entities they reference.

use serde::{Deserialize, Serialize};

/// One arm of the experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variation {
    pub id: String,
    pub weight: f64,
}

impl Variation {
    pub fn new(id: impl Into<String>, weight: f64) -> Self {
        Self {
            id: id.into(),
            weight,
        }
    }
}

/// Reference to a dimension to break results down by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DimensionSpec {
    pub id: String,
}

/// Immutable inputs of a results run, copied onto the snapshot at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSettings {
    pub experiment_id: String,
    pub variations: Vec<Variation>,
    #[serde(default)]
    pub goal_metrics: Vec<String>,
    #[serde(default)]
    pub guardrail_metrics: Vec<String>,
    #[serde(default)]
    pub activation_metric: Option<String>,
    #[serde(default)]
    pub segment: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<DimensionSpec>,
    #[serde(default)]
    pub exposure_query_id: String,
}

impl SnapshotSettings {
    /// Goal then guardrail metric ids, first occurrence wins.
    pub fn selected_metric_ids(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for id in self.goal_metrics.iter().chain(&self.guardrail_metrics) {
            if !seen.contains(&id.as_str()) {
                seen.push(id.as_str());
            }
        }
        seen
    }

    /// Position of a variation id, if it belongs to this experiment.
    pub fn variation_index(&self, id: &str) -> Option<usize> {
        self.variations.iter().position(|v| v.id == id)
    }

    pub fn weights(&self) -> Vec<f64> {
        self.variations.iter().map(|v| v.weight).collect()
    }

    /// Id of the first configured dimension, if any.
    pub fn first_dimension_id(&self) -> Option<&str> {
        self.dimensions.first().map(|d| d.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatsEngine {
    #[default]
    Bayesian,
    Frequentist,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PValueCorrection {
    Holm,
    BenjaminiHochberg,
}

/// Per-analysis knobs. Several analyses can run over the same query rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSettings {
    #[serde(default)]
    pub stats_engine: StatsEngine,
    #[serde(default)]
    pub p_value_correction: Option<PValueCorrection>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub baseline_variation_index: usize,
}

/// Metric as found in the metric catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Id of the metric this one is divided by (ratio metrics).
    #[serde(default)]
    pub denominator: Option<String>,
}

impl MetricDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            denominator: None,
        }
    }

    pub fn with_denominator(mut self, denominator: impl Into<String>) -> Self {
        self.denominator = Some(denominator.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Segment {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    /// Attribute of the user, looked up in the dimension catalog.
    User,
    /// Column exposed by the experiment's exposure query.
    Experiment,
    /// Exposure date.
    Date,
}

/// A resolved dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dimension {
    pub kind: DimensionKind,
    pub id: String,
}

impl Dimension {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: DimensionKind::User,
            id: id.into(),
        }
    }

    pub fn experiment(id: impl Into<String>) -> Self {
        Self {
            kind: DimensionKind::Experiment,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SnapshotSettings {
        SnapshotSettings {
            experiment_id: "exp_1".into(),
            variations: vec![Variation::new("0", 0.5), Variation::new("1", 0.5)],
            goal_metrics: vec!["met_a".into(), "met_b".into(), "met_a".into()],
            guardrail_metrics: vec!["met_b".into(), "met_c".into()],
            activation_metric: None,
            segment: None,
            dimensions: vec![],
            exposure_query_id: "anonymous".into(),
        }
    }

    #[test]
    fn selected_metrics_dedupe_first_wins() {
        assert_eq!(
            settings().selected_metric_ids(),
            vec!["met_a", "met_b", "met_c"]
        );
    }

    #[test]
    fn variation_index_lookup() {
        let s = settings();
        assert_eq!(s.variation_index("1"), Some(1));
        assert_eq!(s.variation_index("2"), None);
        assert_eq!(s.weights(), vec![0.5, 0.5]);
    }

    #[test]
    fn settings_serde_uses_camel_case() {
        let json = serde_json::to_value(settings()).unwrap();
        assert!(json.get("goalMetrics").is_some());
        assert!(json.get("exposureQueryId").is_some());
    }

    #[test]
    fn analysis_settings_defaults() {
        let parsed: AnalysisSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.stats_engine, StatsEngine::Bayesian);
        assert!(parsed.p_value_correction.is_none());
    }
}
