//! Collaborator seams: the data-source integration, catalogs, entitlements.
//!
//! Query text generation and execution belong to the integration; this crate
//! only decides which queries to issue, in what order, with which inputs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{
    Dimension, IntegrationError, MetricDefinition, Segment, SnapshotSettings,
};

/// Entitlement that allows materializing a units table in the warehouse.
pub const PIPELINE_MODE_FEATURE: &str = "pipeline-mode";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceProperties {
    #[serde(default)]
    pub supports_writing_tables: bool,
    #[serde(default)]
    pub separate_experiment_result_queries: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSettings {
    #[serde(default)]
    pub allow_writing: bool,
    #[serde(default)]
    pub write_dataset: Option<String>,
}

impl PipelineSettings {
    /// Dataset to write into, when writing is allowed and one is configured.
    pub fn writable_dataset(&self) -> Option<&str> {
        if !self.allow_writing {
            return None;
        }
        self.write_dataset.as_deref().filter(|d| !d.is_empty())
    }
}

/// Exposure query definition and the experiment dimensions it exposes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExposureQuery {
    pub id: String,
    #[serde(default)]
    pub dimensions: Vec<String>,
}

/// Inputs of the units and traffic queries.
#[derive(Debug, Clone)]
pub struct UnitsQueryParams {
    pub settings: SnapshotSettings,
    pub activation_metric: Option<MetricDefinition>,
    pub dimensions: Vec<Dimension>,
    pub segment: Option<Segment>,
    /// Empty when no units table is materialized.
    pub units_table_full_name: String,
    pub use_units_table: bool,
    pub include_id_joins: bool,
}

/// Inputs of one per-metric query.
#[derive(Debug, Clone)]
pub struct MetricQueryParams {
    pub settings: SnapshotSettings,
    pub metric: MetricDefinition,
    /// Denominator chain of a ratio metric, outermost first.
    pub denominator_metrics: Vec<MetricDefinition>,
    pub activation_metric: Option<MetricDefinition>,
    pub dimension: Option<Dimension>,
    pub segment: Option<Segment>,
    pub use_units_table: bool,
    pub units_table_full_name: String,
}

/// Inputs of the combined results query used by legacy sources.
#[derive(Debug, Clone)]
pub struct LegacyQueryParams {
    pub settings: SnapshotSettings,
    pub metrics: Vec<MetricDefinition>,
    pub activation_metric: Option<MetricDefinition>,
    /// Only user dimensions are supported by legacy sources.
    pub dimension: Option<String>,
}

/// A customer's data warehouse.
#[async_trait]
pub trait SourceIntegration: Send + Sync {
    fn source_properties(&self) -> SourceProperties;

    fn pipeline_settings(&self) -> Option<PipelineSettings> {
        None
    }

    fn exposure_queries(&self) -> Vec<ExposureQuery> {
        Vec::new()
    }

    /// Fully qualified path for a table in `dataset`. `None` when this
    /// source cannot address tables.
    fn generate_table_path(&self, _table: &str, _dataset: &str) -> Option<String> {
        None
    }

    fn units_table_query(&self, params: &UnitsQueryParams) -> String;
    fn metric_query(&self, params: &MetricQueryParams) -> String;
    fn aggregate_units_query(&self, params: &UnitsQueryParams) -> String;
    fn legacy_results_query(&self, params: &LegacyQueryParams) -> String;

    async fn run_units_query(&self, query: &str) -> Result<Vec<Value>, IntegrationError>;
    async fn run_metric_query(&self, query: &str) -> Result<Vec<Value>, IntegrationError>;
    async fn run_aggregate_units_query(&self, query: &str)
        -> Result<Vec<Value>, IntegrationError>;
    async fn run_legacy_results(
        &self,
        params: &LegacyQueryParams,
    ) -> Result<Vec<Value>, IntegrationError>;
}

#[async_trait]
pub trait SegmentCatalog: Send + Sync {
    async fn find_segment(&self, organization: &str, id: &str) -> Option<Segment>;
}

#[async_trait]
pub trait DimensionCatalog: Send + Sync {
    async fn resolve_dimension(&self, organization: &str, id: &str) -> Option<Dimension>;
}

#[async_trait]
pub trait EntitlementPolicy: Send + Sync {
    async fn org_has_feature(&self, organization: &str, feature: &str) -> bool;
}

/// Metric definitions by id, as handed to a run.
#[derive(Debug, Clone, Default)]
pub struct MetricCatalog {
    metrics: HashMap<String, MetricDefinition>,
}

impl MetricCatalog {
    pub fn new(metrics: impl IntoIterator<Item = MetricDefinition>) -> Self {
        Self {
            metrics: metrics.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&MetricDefinition> {
        self.metrics.get(id)
    }

    /// Resolve ids in order, dropping unknown ones.
    pub fn resolve<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Vec<MetricDefinition> {
        ids.into_iter()
            .filter_map(|id| self.metrics.get(id).cloned())
            .collect()
    }

    /// Denominator chain of `id`: its denominator, that metric's denominator,
    /// and so on. Stops at unknown ids and at the first repeated id.
    pub fn denominator_chain(&self, id: &str) -> Vec<MetricDefinition> {
        let mut chain: Vec<MetricDefinition> = Vec::new();
        let mut next = self.metrics.get(id).and_then(|m| m.denominator.clone());
        while let Some(current) = next {
            if current == id || chain.iter().any(|m| m.id == current) {
                break;
            }
            let Some(metric) = self.metrics.get(&current) else {
                break;
            };
            next = metric.denominator.clone();
            chain.push(metric.clone());
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writable_dataset_requires_flag_and_name() {
        let mut p = PipelineSettings {
            allow_writing: true,
            write_dataset: Some("scratch".into()),
        };
        assert_eq!(p.writable_dataset(), Some("scratch"));
        p.write_dataset = Some(String::new());
        assert_eq!(p.writable_dataset(), None);
        p.write_dataset = Some("scratch".into());
        p.allow_writing = false;
        assert_eq!(p.writable_dataset(), None);
    }

    #[test]
    fn resolve_drops_unknown_ids() {
        let catalog = MetricCatalog::new(vec![MetricDefinition::new("a"), MetricDefinition::new("b")]);
        let ids: Vec<String> = catalog
            .resolve(["b", "zzz", "a"])
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn denominator_chain_follows_links() {
        let catalog = MetricCatalog::new(vec![
            MetricDefinition::new("ratio").with_denominator("mid"),
            MetricDefinition::new("mid").with_denominator("base"),
            MetricDefinition::new("base"),
        ]);
        let chain: Vec<String> = catalog
            .denominator_chain("ratio")
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(chain, vec!["mid", "base"]);
        assert!(catalog.denominator_chain("base").is_empty());
    }

    #[test]
    fn denominator_chain_survives_cycles_and_gaps() {
        let catalog = MetricCatalog::new(vec![
            MetricDefinition::new("a").with_denominator("b"),
            MetricDefinition::new("b").with_denominator("a"),
            MetricDefinition::new("c").with_denominator("missing"),
        ]);
        assert_eq!(catalog.denominator_chain("a").len(), 1);
        assert!(catalog.denominator_chain("c").is_empty());
    }
}
