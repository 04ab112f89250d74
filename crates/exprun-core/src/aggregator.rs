//! Turns a completed query map into a snapshot result.
//!
//! Analyses run concurrently and write disjoint slots. Exposure bookkeeping
//! (unknown variations, multiple exposures) and traffic health are computed
//! once from the shared rows, outside the per-analysis section.

use std::sync::Arc;

use futures::future::join_all;
use tracing::debug;

use crate::domain::{
    Analysis, AnalysisError, AnalysisStatus, QueryMap, QueryPayload, SnapshotHealth,
    SnapshotResult, SnapshotSettings, TrafficRow,
};
use crate::engine::{AnalysisEngine, AnalysisInput, AnalysisOutput};
use crate::health::{compute_traffic, EXPOSURE_DATE_DIMENSION};
use crate::integration::MetricCatalog;
use crate::legacy::significant_unknowns;
use crate::planner::{LEGACY_QUERY_NAME, TRAFFIC_QUERY_NAME};

/// Variation value the traffic query reports for units exposed to more
/// than one variation.
pub const MULTIPLE_EXPOSURE_MARKER: &str = "__multiple__";

/// Result of one aggregation pass.
#[derive(Debug)]
pub struct AggregateOutcome {
    pub result: SnapshotResult,
    /// Failed analyses by slot index. Their slots are left as they were.
    pub failures: Vec<(usize, AnalysisError)>,
}

impl AggregateOutcome {
    pub fn first_error(&self) -> Option<String> {
        self.failures.first().map(|(_, e)| e.to_string())
    }
}

pub struct ResultAggregator {
    engine: Arc<dyn AnalysisEngine>,
}

impl ResultAggregator {
    pub fn new(engine: Arc<dyn AnalysisEngine>) -> Self {
        Self { engine }
    }

    pub async fn aggregate(
        &self,
        query_map: &QueryMap,
        settings: &SnapshotSettings,
        analyses: &[Analysis],
        variation_names: &[String],
        metrics: &MetricCatalog,
    ) -> AggregateOutcome {
        let runs = analyses.iter().map(|analysis| {
            self.engine.analyze(AnalysisInput {
                query_map,
                snapshot_settings: settings,
                analysis_settings: &analysis.settings,
                variation_names,
                metrics,
            })
        });
        let outputs = join_all(runs).await;

        let mut slots = analyses.to_vec();
        let mut failures = Vec::new();
        let mut first_output: Option<&AnalysisOutput> = None;

        for (index, output) in outputs.iter().enumerate() {
            match output {
                Ok(out) => {
                    let slot = &mut slots[index];
                    slot.results = out.dimensions.clone();
                    slot.status = AnalysisStatus::Success;
                    slot.error = None;
                    if first_output.is_none() {
                        first_output = Some(out);
                    }
                }
                Err(e) => failures.push((index, e.clone())),
            }
        }

        let reported = first_output.map(|o| (o.unknown_variations.clone(), o.multiple_exposures));
        let (unknown_variations, multiple_exposures) = match exposure_audit(query_map, settings) {
            Some(audit) => {
                let multiple = audit
                    .multiple_exposures
                    .or_else(|| reported.as_ref().map(|(_, m)| *m))
                    .unwrap_or(0);
                (audit.unknown_variations, multiple)
            }
            None => reported.unwrap_or_default(),
        };

        let health = traffic_rows(query_map).map(|rows| SnapshotHealth {
            traffic: compute_traffic(&settings.variations, rows),
        });

        debug!(
            analyses = slots.len(),
            failed = failures.len(),
            unknown = unknown_variations.len(),
            "aggregation complete"
        );

        AggregateOutcome {
            result: SnapshotResult {
                unknown_variations,
                multiple_exposures,
                analyses: slots,
                health,
            },
            failures,
        }
    }
}

fn traffic_rows(query_map: &QueryMap) -> Option<&[TrafficRow]> {
    match query_map.result(TRAFFIC_QUERY_NAME) {
        Some(QueryPayload::Traffic(rows)) => Some(rows),
        _ => None,
    }
}

/// Exposure values derived from the shared query rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureAudit {
    pub unknown_variations: Vec<String>,
    /// `None` when the rows carry no multiple-exposure information (legacy).
    pub multiple_exposures: Option<u64>,
}

/// Unknown variations and multiple-exposure count from the shared rows.
///
/// `None` when neither the legacy results nor the traffic rows are present.
pub fn exposure_audit(query_map: &QueryMap, settings: &SnapshotSettings) -> Option<ExposureAudit> {
    if let Some(QueryPayload::Legacy(legacy)) = query_map.result(LEGACY_QUERY_NAME) {
        return Some(ExposureAudit {
            unknown_variations: legacy.unknown_variations.clone(),
            multiple_exposures: None,
        });
    }

    let rows = traffic_rows(query_map)?;
    let mut total = 0.0;
    let mut multiple = 0.0;
    let mut unknown: Vec<(String, f64)> = Vec::new();

    for row in rows.iter().filter(|r| r.dimension_name == EXPOSURE_DATE_DIMENSION) {
        total += row.units;
        let key = row.variation.as_key();
        if settings.variation_index(&key).is_some() {
            continue;
        }
        if key == MULTIPLE_EXPOSURE_MARKER {
            multiple += row.units;
            continue;
        }
        match unknown.iter_mut().find(|(v, _)| *v == key) {
            Some((_, tally)) => *tally += row.units,
            None => unknown.push((key, row.units)),
        }
    }

    Some(ExposureAudit {
        unknown_variations: significant_unknowns(unknown, total),
        multiple_exposures: Some(multiple.max(0.0).round() as u64),
    })
}
