//! End-to-end results run: create snapshot, dispatch, aggregate, persist.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, Instrument};

use exprun_state::SnapshotStore;

use crate::aggregator::ResultAggregator;
use crate::config::RunnerConfig;
use crate::dispatcher::{saturating_millis, QueryDispatcher};
use crate::domain::{AnalysisSettings, Result, ResultsError, Snapshot, SnapshotSettings};
use crate::engine::{AnalysisEngine, SummaryEngine};
use crate::integration::{MetricCatalog, SourceIntegration};
use crate::lifecycle::{RunStatus, SnapshotLifecycle, SnapshotUpdate};
use crate::metrics::METRICS;
use crate::obs;
use crate::planner::{self, Collaborators, ResultsQueryParams};

/// What to compute in one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub organization: String,
    pub settings: SnapshotSettings,
    /// One slot per analysis. An empty list gets a single default analysis.
    pub analyses: Vec<AnalysisSettings>,
    pub variation_names: Vec<String>,
    pub metrics: MetricCatalog,
}

pub struct ExperimentResultsRunner {
    lifecycle: SnapshotLifecycle,
    integration: Arc<dyn SourceIntegration>,
    collaborators: Collaborators,
    aggregator: ResultAggregator,
    config: RunnerConfig,
}

impl ExperimentResultsRunner {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        integration: Arc<dyn SourceIntegration>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            lifecycle: SnapshotLifecycle::new(store),
            integration,
            collaborators,
            aggregator: ResultAggregator::new(Arc::new(SummaryEngine)),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn AnalysisEngine>) -> Self {
        self.aggregator = ResultAggregator::new(engine);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn lifecycle(&self) -> &SnapshotLifecycle {
        &self.lifecycle
    }

    /// Run every query and analysis for `request`.
    ///
    /// Run-level failures (preconditions, failed queries or analyses, the
    /// run deadline) end in a snapshot with status `error`. `Err` is only
    /// returned when the snapshot itself cannot be persisted.
    pub async fn run(&self, request: RunRequest) -> Result<Snapshot> {
        let RunRequest {
            organization,
            settings,
            mut analyses,
            variation_names,
            metrics,
        } = request;
        if analyses.is_empty() {
            analyses.push(AnalysisSettings::default());
        }

        let mut snapshot = self
            .lifecycle
            .create(&organization, settings, analyses)
            .await?;
        let span = obs::snapshot_span(&snapshot.organization, &snapshot.id);
        self.execute(&mut snapshot, variation_names, metrics)
            .instrument(span)
            .await?;
        Ok(snapshot)
    }

    async fn execute(
        &self,
        snapshot: &mut Snapshot,
        variation_names: Vec<String>,
        metrics: MetricCatalog,
    ) -> Result<()> {
        let started = Instant::now();
        obs::emit_snapshot_started(&snapshot.id, &snapshot.experiment_id, snapshot.analyses.len());

        let dispatcher = QueryDispatcher::new(self.config.query_timeout);
        let params = ResultsQueryParams {
            organization: snapshot.organization.clone(),
            query_parent_id: snapshot.id.clone(),
            settings: snapshot.settings.clone(),
            metrics,
        };

        if let Err(e) = planner::start_queries(
            &params,
            Arc::clone(&self.integration),
            &self.collaborators,
            &dispatcher,
        )
        .await
        {
            // A duplicate name can surface after earlier queries started.
            dispatcher.cancel_all();
            dispatcher.wait_all().await;
            if !e.is_precondition() {
                return Err(e);
            }
            let update = SnapshotUpdate::failed(e.to_string()).with_queries(Vec::new());
            return self.finish(snapshot, update, started).await;
        }

        self.lifecycle
            .update(
                snapshot,
                SnapshotUpdate::running(dispatcher.pointers()).with_run_started(Utc::now()),
            )
            .await?;

        let deadline_hit = match self.config.run_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.track_progress(snapshot, &dispatcher))
                    .await
                    .is_err()
            }
            None => {
                self.track_progress(snapshot, &dispatcher).await;
                false
            }
        };
        if deadline_hit {
            dispatcher.cancel_all();
        }

        let query_map = dispatcher.wait_all().await;
        let queries = dispatcher.pointers();

        let update = if deadline_hit {
            let limit = self.config.run_timeout.unwrap_or_default();
            let err = ResultsError::Cancelled {
                reason: format!("run deadline of {}ms exceeded", limit.as_millis()),
            };
            SnapshotUpdate::failed(err.to_string())
        } else if query_map.succeeded().next().is_none() {
            let first_error = queries
                .iter()
                .find_map(|p| p.error.clone())
                .unwrap_or_default();
            let err = ResultsError::AllQueriesFailed {
                count: queries.len(),
                first_error,
            };
            SnapshotUpdate::failed(err.to_string())
        } else {
            let outcome = self
                .aggregator
                .aggregate(
                    &query_map,
                    &snapshot.settings,
                    &snapshot.analyses,
                    &variation_names,
                    &params.metrics,
                )
                .await;
            for (index, error) in &outcome.failures {
                METRICS.inc_analyses_failed();
                obs::emit_analysis_failed(&snapshot.id, *index, error);
            }
            match outcome.first_error() {
                Some(error) => SnapshotUpdate::failed(error),
                None => SnapshotUpdate::new(RunStatus::Succeeded),
            }
            .with_result(outcome.result)
        };

        self.finish(snapshot, update.with_queries(queries), started)
            .await
    }

    /// Persist query progress until every query is terminal.
    async fn track_progress(&self, snapshot: &mut Snapshot, dispatcher: &QueryDispatcher) {
        while let Some(pointer) = dispatcher.next_finished().await {
            debug!(query = %pointer.name, status = ?pointer.status, "query progress");
            if dispatcher.all_terminal() {
                break;
            }
            let update = SnapshotUpdate::running(dispatcher.pointers());
            if let Err(e) = self.lifecycle.update(snapshot, update).await {
                obs::emit_persist_error(&snapshot.id, &e);
            }
        }
    }

    async fn finish(
        &self,
        snapshot: &mut Snapshot,
        update: SnapshotUpdate,
        started: Instant,
    ) -> Result<()> {
        let status = update.status;
        self.lifecycle.update(snapshot, update).await?;

        match status {
            RunStatus::Failed => METRICS.inc_snapshots_failed(),
            _ => METRICS.inc_snapshots_succeeded(),
        }
        obs::emit_snapshot_finished(
            &snapshot.id,
            snapshot.status,
            saturating_millis(started.elapsed()),
            snapshot.queries.len(),
        );
        METRICS.flush();
        Ok(())
    }
}
