//! Dependency-ordered query dispatch.
//!
//! Each registered query runs in its own task. A task first waits for every
//! dependency to reach a terminal state; if any of them failed, the query is
//! failed without running. Status changes are published on a per-query
//! `watch` channel that dependents subscribe to, and a shared cancellation
//! flag fails everything still in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::domain::{
    DispatchError, IntegrationError, QueryError, QueryMap, QueryPayload, QueryPointer, QueryStatus,
};
use crate::metrics::METRICS;
use crate::obs;

/// Everything needed to register one query.
pub struct QuerySpec<R, P> {
    pub name: String,
    pub query: String,
    pub dependencies: Vec<String>,
    /// Executes the query text against the data source.
    pub run: R,
    /// Turns raw rows into the stored payload.
    pub process: P,
}

impl<R, Fut, P> QuerySpec<R, P>
where
    R: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Vec<Value>, IntegrationError>> + Send + 'static,
    P: FnOnce(Vec<Value>) -> Result<QueryPayload, QueryError> + Send + 'static,
{
    pub fn new(
        name: impl Into<String>,
        query: impl Into<String>,
        dependencies: Vec<String>,
        run: R,
        process: P,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            dependencies,
            run,
            process,
        }
    }
}

/// Pass-through processing for queries whose rows are used as-is.
pub fn keep_rows(rows: Vec<Value>) -> Result<QueryPayload, QueryError> {
    Ok(QueryPayload::Rows(rows))
}

#[derive(Default)]
struct DispatchState {
    /// Registration order.
    pointers: Vec<QueryPointer>,
    status: HashMap<String, watch::Receiver<QueryStatus>>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchState {
    fn pointer_mut(&mut self, name: &str) -> Option<&mut QueryPointer> {
        self.pointers.iter_mut().find(|p| p.name == name)
    }
}

/// Dispatches named queries for one run.
pub struct QueryDispatcher {
    state: Arc<Mutex<DispatchState>>,
    query_timeout: Option<Duration>,
    cancel: Arc<watch::Sender<bool>>,
    finished_tx: mpsc::UnboundedSender<String>,
    finished_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl Default for QueryDispatcher {
    fn default() -> Self {
        Self::new(None)
    }
}

impl QueryDispatcher {
    pub fn new(query_timeout: Option<Duration>) -> Self {
        let (cancel, _) = watch::channel(false);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(DispatchState::default())),
            query_timeout,
            cancel: Arc::new(cancel),
            finished_tx,
            finished_rx: tokio::sync::Mutex::new(finished_rx),
        }
    }

    /// Register a query and start its task.
    ///
    /// Names must be unique within the run and every dependency must already
    /// be registered. Must be called within a tokio runtime.
    pub fn start_query<R, Fut, P>(
        &self,
        spec: QuerySpec<R, P>,
    ) -> Result<QueryPointer, DispatchError>
    where
        R: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Value>, IntegrationError>> + Send + 'static,
        P: FnOnce(Vec<Value>) -> Result<QueryPayload, QueryError> + Send + 'static,
    {
        let QuerySpec {
            name,
            query,
            dependencies,
            run,
            process,
        } = spec;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.status.contains_key(&name) {
            return Err(DispatchError::DuplicateQuery { name });
        }
        let mut upstream = Vec::with_capacity(dependencies.len());
        for dep in &dependencies {
            match state.status.get(dep) {
                Some(rx) => upstream.push((dep.clone(), rx.clone())),
                None => {
                    return Err(DispatchError::UnknownDependency {
                        name,
                        dependency: dep.clone(),
                    })
                }
            }
        }

        let pointer = QueryPointer::queued(&name, &query, dependencies);
        let (status_tx, status_rx) = watch::channel(QueryStatus::Queued);
        state.pointers.push(pointer.clone());
        state.status.insert(name.clone(), status_rx);
        METRICS.inc_queries_started();

        let task = QueryTask {
            name: name.clone(),
            state: Arc::clone(&self.state),
            status_tx,
            cancel: Arc::clone(&self.cancel),
            finished_tx: self.finished_tx.clone(),
            query_timeout: self.query_timeout,
        };
        let handle = tokio::spawn(
            task.drive(query, upstream, run, process)
                .instrument(tracing::Span::current()),
        );
        state.tasks.push(handle);
        debug!(query = %name, "query registered");

        Ok(pointer)
    }

    /// Current view of every registered query, in registration order.
    pub fn pointers(&self) -> Vec<QueryPointer> {
        self.lock().pointers.clone()
    }

    pub fn pointer(&self, name: &str) -> Option<QueryPointer> {
        self.lock().pointers.iter().find(|p| p.name == name).cloned()
    }

    pub fn all_terminal(&self) -> bool {
        self.lock().pointers.iter().all(|p| p.status.is_terminal())
    }

    /// Next query to reach a terminal state, or `None` once all have.
    pub async fn next_finished(&self) -> Option<QueryPointer> {
        let mut rx = self.finished_rx.lock().await;
        if let Ok(name) = rx.try_recv() {
            return self.pointer(&name);
        }
        if self.all_terminal() {
            // Names are sent under the state lock, so a late one is visible here.
            return rx.try_recv().ok().and_then(|name| self.pointer(&name));
        }
        let name = rx.recv().await?;
        self.pointer(&name)
    }

    /// Fail every query that has not finished yet.
    pub fn cancel_all(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait for every task, then collect the terminal queries.
    pub async fn wait_all(&self) -> QueryMap {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut self.lock().tasks);
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "query task did not complete");
            }
        }

        let mut state = self.lock();
        for pointer in state.pointers.iter_mut() {
            if !pointer.status.is_terminal() {
                pointer.status = QueryStatus::Failed;
                pointer.error = Some(QueryError::Aborted("task ended early".into()).to_string());
                pointer.finished_at = Some(Utc::now());
            }
        }
        QueryMap::from_terminal(state.pointers.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct QueryTask {
    name: String,
    state: Arc<Mutex<DispatchState>>,
    status_tx: watch::Sender<QueryStatus>,
    cancel: Arc<watch::Sender<bool>>,
    finished_tx: mpsc::UnboundedSender<String>,
    query_timeout: Option<Duration>,
}

impl QueryTask {
    async fn drive<R, Fut, P>(
        self,
        query: String,
        upstream: Vec<(String, watch::Receiver<QueryStatus>)>,
        run: R,
        process: P,
    ) where
        R: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<Value>, IntegrationError>> + Send + 'static,
        P: FnOnce(Vec<Value>) -> Result<QueryPayload, QueryError> + Send + 'static,
    {
        let cancel_rx = self.cancel.subscribe();

        for (dependency, mut rx) in upstream {
            let outcome = tokio::select! {
                status = terminal_status(&mut rx) => status,
                _ = cancelled(cancel_rx.clone()) => {
                    self.finish(Err(QueryError::Cancelled));
                    return;
                }
            };
            if outcome != Some(QueryStatus::Succeeded) {
                self.finish(Err(QueryError::DependencyFailed { dependency }));
                return;
            }
        }

        self.mark_running();

        let work = async move {
            let rows = run(query).await?;
            process(rows)
        };
        let timed = async {
            match self.query_timeout {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(QueryError::Timeout {
                        after_ms: saturating_millis(limit),
                    })),
                None => work.await,
            }
        };
        let outcome = tokio::select! {
            res = timed => res,
            _ = cancelled(cancel_rx) => Err(QueryError::Cancelled),
        };
        self.finish(outcome);
    }

    fn mark_running(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(p) = state.pointer_mut(&self.name) {
                p.status = QueryStatus::Running;
                p.started_at = Some(Utc::now());
            }
        }
        self.status_tx.send_replace(QueryStatus::Running);
    }

    fn finish(&self, outcome: Result<QueryPayload, QueryError>) {
        let status = if outcome.is_ok() {
            QueryStatus::Succeeded
        } else {
            QueryStatus::Failed
        };
        let finished = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let finished = state.pointer_mut(&self.name).map(|p| {
                p.status = status;
                p.finished_at = Some(Utc::now());
                match outcome {
                    Ok(payload) => p.result = Some(payload),
                    Err(e) => p.error = Some(e.to_string()),
                }
                (p.duration_ms(), p.error.clone())
            });
            let _ = self.finished_tx.send(self.name.clone());
            finished
        };

        if let Some((duration_ms, error)) = finished {
            if status == QueryStatus::Failed {
                METRICS.inc_queries_failed();
            }
            obs::emit_query_finished(&self.name, status, duration_ms, error.as_deref());
        }
        self.status_tx.send_replace(status);
    }
}

async fn terminal_status(rx: &mut watch::Receiver<QueryStatus>) -> Option<QueryStatus> {
    let status = rx.wait_for(|s| s.is_terminal()).await.ok()?;
    Some(*status)
}

/// Resolves once the cancellation flag is raised; never if it is dropped.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
