//! Fixture-driven data source that replays canned warehouse rows.
//!
//! Generated query text starts with a `-- fixture:<key>` line naming the
//! canned row set it resolves to:
//!
//! | query            | key               |
//! |------------------|-------------------|
//! | units table      | `units`           |
//! | per-metric       | `metric:<id>`     |
//! | aggregate units  | `traffic`         |
//! | legacy combined  | `results`         |
//!
//! A key listed under `failures` fails with the given message; a key listed
//! under `delaysMs` sleeps before answering.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::catalog::StaticCatalog;
use crate::domain::{
    AnalysisSettings, IntegrationError, MetricDefinition, Result, ResultsError, SnapshotSettings,
};
use crate::integration::{
    ExposureQuery, LegacyQueryParams, MetricCatalog, MetricQueryParams, PipelineSettings,
    SourceIntegration, SourceProperties, UnitsQueryParams,
};
use crate::runner::RunRequest;

const KEY_PREFIX: &str = "-- fixture:";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSource {
    #[serde(default)]
    pub properties: SourceProperties,
    #[serde(default)]
    pub pipeline: Option<PipelineSettings>,
    #[serde(default)]
    pub exposure_queries: Vec<ExposureQuery>,
    /// Whether `generate_table_path` is available.
    #[serde(default)]
    pub table_paths: bool,
    #[serde(default)]
    pub rows: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub failures: HashMap<String, String>,
    #[serde(default)]
    pub delays_ms: HashMap<String, u64>,
}

/// [`SourceIntegration`] over a [`FixtureSource`]. Records every executed key.
#[derive(Debug, Default)]
pub struct FixtureIntegration {
    source: FixtureSource,
    calls: Mutex<Vec<String>>,
}

impl FixtureIntegration {
    pub fn new(source: FixtureSource) -> Self {
        Self {
            source,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Keys executed so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn key_of(query: &str) -> Option<&str> {
        query.lines().next()?.strip_prefix(KEY_PREFIX).map(str::trim)
    }

    async fn execute(&self, key: &str) -> std::result::Result<Vec<Value>, IntegrationError> {
        self.calls.lock().unwrap().push(key.to_string());
        if let Some(ms) = self.source.delays_ms.get(key) {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if let Some(message) = self.source.failures.get(key) {
            return Err(IntegrationError::Query(message.clone()));
        }
        let rows = self.source.rows.get(key).cloned().unwrap_or_default();
        debug!(key, rows = rows.len(), "fixture query answered");
        Ok(rows)
    }

    async fn execute_text(&self, query: &str) -> std::result::Result<Vec<Value>, IntegrationError> {
        let key = Self::key_of(query)
            .ok_or_else(|| IntegrationError::Query(format!("not a fixture query: {query}")))?;
        self.execute(key).await
    }
}

fn fixture_query(key: &str, body: String) -> String {
    format!("{KEY_PREFIX}{key}\n{body}")
}

#[async_trait]
impl SourceIntegration for FixtureIntegration {
    fn source_properties(&self) -> SourceProperties {
        self.source.properties
    }

    fn pipeline_settings(&self) -> Option<PipelineSettings> {
        self.source.pipeline.clone()
    }

    fn exposure_queries(&self) -> Vec<ExposureQuery> {
        self.source.exposure_queries.clone()
    }

    fn generate_table_path(&self, table: &str, dataset: &str) -> Option<String> {
        self.source
            .table_paths
            .then(|| format!("{dataset}.{table}"))
    }

    fn units_table_query(&self, params: &UnitsQueryParams) -> String {
        fixture_query(
            "units",
            format!(
                "CREATE TABLE {} AS SELECT units FOR {}",
                params.units_table_full_name, params.settings.experiment_id
            ),
        )
    }

    fn metric_query(&self, params: &MetricQueryParams) -> String {
        let denominators: Vec<&str> = params
            .denominator_metrics
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        fixture_query(
            &format!("metric:{}", params.metric.id),
            format!(
                "SELECT {} / [{}] FROM {}",
                params.metric.id,
                denominators.join(","),
                if params.use_units_table {
                    params.units_table_full_name.as_str()
                } else {
                    "exposures"
                }
            ),
        )
    }

    fn aggregate_units_query(&self, params: &UnitsQueryParams) -> String {
        let dimensions: Vec<&str> = params.dimensions.iter().map(|d| d.id.as_str()).collect();
        fixture_query(
            "traffic",
            format!("SELECT traffic BY [{}]", dimensions.join(",")),
        )
    }

    fn legacy_results_query(&self, params: &LegacyQueryParams) -> String {
        let metrics: Vec<&str> = params.metrics.iter().map(|m| m.id.as_str()).collect();
        fixture_query(
            "results",
            format!(
                "SELECT [{}] BY {}",
                metrics.join(","),
                params.dimension.as_deref().unwrap_or("nothing")
            ),
        )
    }

    async fn run_units_query(&self, query: &str) -> std::result::Result<Vec<Value>, IntegrationError> {
        self.execute_text(query).await
    }

    async fn run_metric_query(&self, query: &str) -> std::result::Result<Vec<Value>, IntegrationError> {
        self.execute_text(query).await
    }

    async fn run_aggregate_units_query(
        &self,
        query: &str,
    ) -> std::result::Result<Vec<Value>, IntegrationError> {
        self.execute_text(query).await
    }

    async fn run_legacy_results(
        &self,
        _params: &LegacyQueryParams,
    ) -> std::result::Result<Vec<Value>, IntegrationError> {
        self.execute("results").await
    }
}

/// A complete results run described in one JSON document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFixture {
    pub organization: String,
    pub settings: SnapshotSettings,
    #[serde(default)]
    pub analyses: Vec<AnalysisSettings>,
    #[serde(default)]
    pub variation_names: Vec<String>,
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub catalog: StaticCatalog,
    #[serde(default)]
    pub source: FixtureSource,
}

impl RunFixture {
    pub fn from_json(raw: &str) -> Result<Self> {
        let fixture: RunFixture = serde_json::from_str(raw)?;
        if fixture.settings.variations.is_empty() {
            return Err(ResultsError::Fixture(
                "settings.variations must not be empty".into(),
            ));
        }
        Ok(fixture)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_json(&raw)
    }

    /// Split into the run request, the integration and the catalog.
    pub fn into_parts(self) -> (RunRequest, Arc<FixtureIntegration>, Arc<StaticCatalog>) {
        let variation_names = if self.variation_names.is_empty() {
            self.settings.variations.iter().map(|v| v.id.clone()).collect()
        } else {
            self.variation_names
        };
        let request = RunRequest {
            organization: self.organization,
            settings: self.settings,
            analyses: self.analyses,
            variation_names,
            metrics: MetricCatalog::new(self.metrics),
        };
        (
            request,
            Arc::new(FixtureIntegration::new(self.source)),
            Arc::new(self.catalog),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_of_reads_header_line() {
        let q = fixture_query("metric:met_a", "SELECT 1".into());
        assert_eq!(FixtureIntegration::key_of(&q), Some("metric:met_a"));
        assert_eq!(FixtureIntegration::key_of("SELECT 1"), None);
    }

    #[tokio::test]
    async fn execute_replays_rows_and_failures() {
        let mut source = FixtureSource::default();
        source
            .rows
            .insert("traffic".into(), vec![serde_json::json!({"units": 1})]);
        source.failures.insert("units".into(), "permission denied".into());
        let integration = FixtureIntegration::new(source);

        let rows = integration.execute("traffic").await.unwrap();
        assert_eq!(rows.len(), 1);
        let err = integration.execute("units").await.unwrap_err();
        assert_eq!(err.to_string(), "permission denied");
        assert!(integration.execute("metric:none").await.unwrap().is_empty());
        assert_eq!(integration.calls(), vec!["traffic", "units", "metric:none"]);
    }

    #[test]
    fn fixture_requires_variations() {
        let raw = r#"{
            "organization": "org_1",
            "settings": {"experimentId": "exp_1", "variations": []},
            "metrics": []
        }"#;
        let err = RunFixture::from_json(raw).unwrap_err();
        assert!(matches!(err, ResultsError::Fixture(_)));
    }
}
