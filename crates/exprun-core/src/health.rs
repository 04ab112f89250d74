//! Traffic health: per-variation unit counts and SRM per bucket.

use std::collections::{BTreeMap, HashMap};

use crate::domain::{SnapshotTraffic, TrafficDimension, TrafficRow, Variation};
use crate::stats::check_srm;

/// Dimension whose rows drive the overall bucket. Every exposure has a date,
/// so summing over it counts each unit exactly once.
pub const EXPOSURE_DATE_DIMENSION: &str = "dim_exposure_date";

/// Name of the overall bucket.
pub const OVERALL_BUCKET: &str = "All";

/// Build the traffic section of snapshot health from traffic query rows.
///
/// Rows naming a variation outside the experiment are skipped.
pub fn compute_traffic(variations: &[Variation], rows: &[TrafficRow]) -> SnapshotTraffic {
    let n = variations.len();
    let index: HashMap<&str, usize> = variations
        .iter()
        .enumerate()
        .map(|(i, v)| (v.id.as_str(), i))
        .collect();
    let weights: Vec<f64> = variations.iter().map(|v| v.weight).collect();

    let mut overall = TrafficDimension::empty(OVERALL_BUCKET, n);
    let mut dimension: BTreeMap<String, Vec<TrafficDimension>> = BTreeMap::new();

    for row in rows {
        let key = row.variation.as_key();
        let Some(&v) = index.get(key.as_str()) else {
            continue;
        };

        let buckets = dimension.entry(row.dimension_name.clone()).or_default();
        let bucket = match buckets.iter().position(|b| b.name == row.dimension_value) {
            Some(i) => &mut buckets[i],
            None => {
                buckets.push(TrafficDimension::empty(row.dimension_value.clone(), n));
                let last = buckets.len() - 1;
                &mut buckets[last]
            }
        };
        bucket.variation_units[v] += row.units;

        if row.dimension_name == EXPOSURE_DATE_DIMENSION {
            overall.variation_units[v] += row.units;
        }
    }

    overall.srm = check_srm(&overall.variation_units, &weights);
    for bucket in dimension.values_mut().flatten() {
        bucket.srm = check_srm(&bucket.variation_units, &weights);
    }

    SnapshotTraffic { overall, dimension }
}
