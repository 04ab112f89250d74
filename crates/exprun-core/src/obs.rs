//! Structured observability hooks for snapshot runs.
//!
//! This module provides:
//! - A snapshot-scoped tracing span via [`snapshot_span`]
//! - Emission functions for lifecycle events: run start, query finish,
//!   analysis failure, run finish
//!
//! Events are emitted at `info!` level, failures at `warn!`. Filtering and
//! JSON output are configured through [`crate::telemetry`].

use tracing::{info, warn};

use crate::domain::{QueryStatus, SnapshotStatus};

/// Span scoping every event of one snapshot run.
///
/// The runner instruments its future with this span; query tasks spawned
/// inside it inherit the span.
pub fn snapshot_span(organization: &str, snapshot_id: &str) -> tracing::Span {
    tracing::info_span!(
        "exprun.snapshot",
        organization = %organization,
        snapshot_id = %snapshot_id,
    )
}

/// Emit event: snapshot run started.
pub fn emit_snapshot_started(snapshot_id: &str, experiment_id: &str, analyses: usize) {
    info!(
        event = "snapshot.started",
        snapshot_id = %snapshot_id,
        experiment_id = %experiment_id,
        analyses = analyses,
    );
}

/// Emit event: one query reached a terminal state.
pub fn emit_query_finished(
    query: &str,
    status: QueryStatus,
    duration_ms: Option<u64>,
    error: Option<&str>,
) {
    match error {
        Some(error) => warn!(
            event = "query.finished",
            query = %query,
            status = ?status,
            duration_ms = duration_ms,
            error = %error,
        ),
        None => info!(
            event = "query.finished",
            query = %query,
            status = ?status,
            duration_ms = duration_ms,
        ),
    }
}

/// Emit event: an analysis failed; its slot keeps its previous state.
pub fn emit_analysis_failed(snapshot_id: &str, index: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "analysis.failed",
        snapshot_id = %snapshot_id,
        analysis = index,
        error = %error,
    );
}

/// Emit event: snapshot run finished.
pub fn emit_snapshot_finished(
    snapshot_id: &str,
    status: SnapshotStatus,
    duration_ms: u64,
    queries: usize,
) {
    info!(
        event = "snapshot.finished",
        snapshot_id = %snapshot_id,
        status = %status,
        duration_ms = duration_ms,
        queries = queries,
    );
}

/// Emit event: an intermediate snapshot write failed (warning level).
pub fn emit_persist_error(snapshot_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "snapshot.persist_error", snapshot_id = %snapshot_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_span_enters() {
        let span = snapshot_span("org_1", "snp_1");
        let _guard = span.enter();
        emit_snapshot_started("snp_1", "exp_1", 2);
    }
}
