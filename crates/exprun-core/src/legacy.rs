//! Reshaping of the single combined results query.
//!
//! Data sources without separate per-metric queries return flat rows of
//! `{dimension, variation, users, metrics[]}`. They are regrouped per
//! dimension and per variation here. Variations the experiment does not know
//! about are tallied and reported only when they carry a meaningful share of
//! users.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::{SnapshotSettings, VariationKey};

/// Unknown variations below this share of all users are treated as noise.
pub const UNKNOWN_VARIATION_THRESHOLD: f64 = 0.02;

/// Sufficient statistics of one metric.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricStats {
    #[serde(default)]
    pub count: f64,
    #[serde(default)]
    pub main_sum: f64,
    #[serde(default)]
    pub main_sum_squares: f64,
}

impl MetricStats {
    pub fn merge(&mut self, other: &MetricStats) {
        self.count += other.count;
        self.main_sum += other.main_sum;
        self.main_sum_squares += other.main_sum_squares;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyMetricRow {
    pub metric: String,
    #[serde(flatten)]
    pub stats: MetricStats,
}

/// One row of the combined results query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyRow {
    #[serde(default)]
    pub dimension: String,
    pub variation: VariationKey,
    #[serde(default)]
    pub users: Option<f64>,
    #[serde(default)]
    pub metrics: Vec<LegacyMetricRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyVariation {
    /// Index into the experiment's variation list.
    pub variation: usize,
    pub users: f64,
    pub metrics: BTreeMap<String, MetricStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegacyDimension {
    pub dimension: String,
    pub variations: Vec<LegacyVariation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LegacyResults {
    pub dimensions: Vec<LegacyDimension>,
    pub unknown_variations: Vec<String>,
}

/// Regroup flat rows per dimension (first-seen order) and per variation.
pub fn process_legacy_rows(settings: &SnapshotSettings, rows: Vec<LegacyRow>) -> LegacyResults {
    let mut out = LegacyResults::default();
    let mut dimension_index: HashMap<String, usize> = HashMap::new();
    // (raw variation, users) in first-seen order
    let mut unknown: Vec<(String, f64)> = Vec::new();
    let mut total_users = 0.0;

    for row in rows {
        let slot = *dimension_index
            .entry(row.dimension.clone())
            .or_insert_with(|| {
                out.dimensions.push(LegacyDimension {
                    dimension: row.dimension.clone(),
                    variations: Vec::new(),
                });
                out.dimensions.len() - 1
            });

        let users = row.users.unwrap_or(0.0);
        total_users += users;

        let raw = row.variation.as_key();
        let Some(variation) = settings.variation_index(&raw) else {
            match unknown.iter_mut().find(|(v, _)| *v == raw) {
                Some((_, tally)) => *tally += users,
                None => unknown.push((raw, users)),
            }
            continue;
        };

        let dimension = &mut out.dimensions[slot];
        let entry = match dimension
            .variations
            .iter()
            .position(|v| v.variation == variation)
        {
            Some(i) => &mut dimension.variations[i],
            None => {
                dimension.variations.push(LegacyVariation {
                    variation,
                    users: 0.0,
                    metrics: BTreeMap::new(),
                });
                let last = dimension.variations.len() - 1;
                &mut dimension.variations[last]
            }
        };
        entry.users += users;
        for m in row.metrics {
            entry.metrics.entry(m.metric).or_default().merge(&m.stats);
        }
    }

    out.unknown_variations = significant_unknowns(unknown, total_users);
    out
}

/// Keep unknown variations whose share of `total` reaches the threshold.
pub(crate) fn significant_unknowns(tallies: Vec<(String, f64)>, total: f64) -> Vec<String> {
    if total <= 0.0 {
        return Vec::new();
    }
    tallies
        .into_iter()
        .filter(|(_, users)| users / total >= UNKNOWN_VARIATION_THRESHOLD)
        .map(|(variation, _)| variation)
        .collect()
}
