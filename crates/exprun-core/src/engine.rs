//! Statistical analysis seam.
//!
//! The aggregator treats analysis as an opaque capability behind
//! [`AnalysisEngine`]. [`SummaryEngine`] is the built-in implementation: it
//! reports descriptive statistics per dimension, variation and metric.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::domain::{
    AnalysisDimension, AnalysisError, AnalysisSettings, AnalysisVariation, MetricSummary,
    QueryMap, QueryPayload, SnapshotSettings, VariationKey,
};
use crate::integration::MetricCatalog;
use crate::legacy::{LegacyResults, MetricStats};
use crate::planner::LEGACY_QUERY_NAME;
use crate::stats::check_srm;

/// Everything one analysis reads. Shared by all analyses of a run.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInput<'a> {
    pub query_map: &'a QueryMap,
    pub snapshot_settings: &'a SnapshotSettings,
    pub analysis_settings: &'a AnalysisSettings,
    pub variation_names: &'a [String],
    pub metrics: &'a MetricCatalog,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisOutput {
    pub dimensions: Vec<AnalysisDimension>,
    pub unknown_variations: Vec<String>,
    pub multiple_exposures: u64,
}

#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(&self, input: AnalysisInput<'_>) -> Result<AnalysisOutput, AnalysisError>;
}

/// Count, total, mean and sample standard deviation of every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryEngine;

#[async_trait]
impl AnalysisEngine for SummaryEngine {
    async fn analyze(&self, input: AnalysisInput<'_>) -> Result<AnalysisOutput, AnalysisError> {
        if let Some(QueryPayload::Legacy(legacy)) = input.query_map.result(LEGACY_QUERY_NAME) {
            return Ok(summarize_legacy(input.snapshot_settings, legacy));
        }
        summarize_metric_rows(&input)
    }
}

/// One row of a per-metric query.
#[derive(Debug, Deserialize)]
struct MetricRow {
    variation: VariationKey,
    #[serde(default)]
    dimension: String,
    #[serde(default)]
    users: f64,
    #[serde(flatten)]
    stats: MetricStats,
}

fn summarize_legacy(settings: &SnapshotSettings, legacy: &LegacyResults) -> AnalysisOutput {
    let n = settings.variations.len();
    let weights = settings.weights();

    let dimensions = legacy
        .dimensions
        .iter()
        .map(|d| {
            let mut variations = vec![AnalysisVariation::default(); n];
            for v in d.variations.iter().filter(|v| v.variation < n) {
                let slot = &mut variations[v.variation];
                slot.users = v.users;
                slot.metrics = v
                    .metrics
                    .iter()
                    .map(|(id, stats)| (id.clone(), summarize(stats)))
                    .collect();
            }
            finish_dimension(d.dimension.clone(), variations, &weights)
        })
        .collect();

    AnalysisOutput {
        dimensions,
        unknown_variations: legacy.unknown_variations.clone(),
        multiple_exposures: 0,
    }
}

fn summarize_metric_rows(input: &AnalysisInput<'_>) -> Result<AnalysisOutput, AnalysisError> {
    let settings = input.snapshot_settings;
    let n = settings.variations.len();

    // dimension name -> (users per variation, stats per variation per metric)
    let mut order: Vec<String> = Vec::new();
    let mut users: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut stats: BTreeMap<String, Vec<BTreeMap<String, MetricStats>>> = BTreeMap::new();
    let mut usable = 0usize;

    for metric_id in settings.selected_metric_ids() {
        if input.metrics.get(metric_id).is_none() {
            continue;
        }
        let Some(QueryPayload::Rows(rows)) = input.query_map.result(metric_id) else {
            continue;
        };
        usable += 1;

        for raw in rows {
            let row = parse_metric_row(metric_id, raw)?;
            let Some(v) = settings.variation_index(&row.variation.as_key()) else {
                continue;
            };
            if !users.contains_key(&row.dimension) {
                order.push(row.dimension.clone());
                users.insert(row.dimension.clone(), vec![0.0; n]);
                stats.insert(row.dimension.clone(), vec![BTreeMap::new(); n]);
            }
            if let Some(u) = users.get_mut(&row.dimension) {
                // Every metric query repeats the unit counts.
                u[v] = u[v].max(row.users);
            }
            if let Some(s) = stats.get_mut(&row.dimension) {
                s[v].entry(metric_id.to_string())
                    .or_default()
                    .merge(&row.stats);
            }
        }
    }

    if usable == 0 {
        return Err(AnalysisError::MissingData {
            query: settings
                .selected_metric_ids()
                .first()
                .map(|s| s.to_string())
                .unwrap_or_else(|| LEGACY_QUERY_NAME.to_string()),
        });
    }

    let weights = settings.weights();
    let dimensions = order
        .into_iter()
        .map(|name| {
            let unit_counts = users.remove(&name).unwrap_or_default();
            let metric_stats = stats.remove(&name).unwrap_or_default();
            let variations = unit_counts
                .into_iter()
                .zip(metric_stats)
                .map(|(users, metrics)| AnalysisVariation {
                    users,
                    metrics: metrics
                        .iter()
                        .map(|(id, s)| (id.clone(), summarize(s)))
                        .collect(),
                })
                .collect();
            finish_dimension(name, variations, &weights)
        })
        .collect();

    Ok(AnalysisOutput {
        dimensions,
        unknown_variations: Vec::new(),
        multiple_exposures: 0,
    })
}

fn parse_metric_row(metric_id: &str, raw: &Value) -> Result<MetricRow, AnalysisError> {
    serde_json::from_value(raw.clone())
        .map_err(|e| AnalysisError::Engine(format!("metric {metric_id}: {e}")))
}

fn finish_dimension(
    name: String,
    variations: Vec<AnalysisVariation>,
    weights: &[f64],
) -> AnalysisDimension {
    let users: Vec<f64> = variations.iter().map(|v| v.users).collect();
    AnalysisDimension {
        name,
        srm: check_srm(&users, weights),
        variations,
    }
}

fn summarize(stats: &MetricStats) -> MetricSummary {
    let count = stats.count;
    let mean = if count > 0.0 {
        stats.main_sum / count
    } else {
        0.0
    };
    let stddev = if count > 1.0 {
        let variance = (stats.main_sum_squares - stats.main_sum.powi(2) / count) / (count - 1.0);
        variance.max(0.0).sqrt()
    } else {
        0.0
    };
    MetricSummary {
        count,
        value: stats.main_sum,
        mean,
        stddev,
    }
}
