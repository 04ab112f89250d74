//! Global atomic counters for results runs.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the runner does this when a snapshot finishes).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    queries_started: AtomicU64,
    queries_failed: AtomicU64,
    snapshots_succeeded: AtomicU64,
    snapshots_failed: AtomicU64,
    analyses_failed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            queries_started: AtomicU64::new(0),
            queries_failed: AtomicU64::new(0),
            snapshots_succeeded: AtomicU64::new(0),
            snapshots_failed: AtomicU64::new(0),
            analyses_failed: AtomicU64::new(0),
        }
    }

    pub fn inc_queries_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries_started", "counter incremented");
    }

    pub fn inc_queries_failed(&self) {
        self.queries_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries_failed", "counter incremented");
    }

    pub fn inc_snapshots_succeeded(&self) {
        self.snapshots_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_snapshots_failed(&self) {
        self.snapshots_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_analyses_failed(&self) {
        self.analyses_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "analyses_failed", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            queries_started = self.queries_started(),
            queries_failed = self.queries_failed(),
            snapshots_succeeded = self.snapshots_succeeded(),
            snapshots_failed = self.snapshots_failed(),
            analyses_failed = self.analyses_failed(),
        );
    }

    pub fn queries_started(&self) -> u64 {
        self.queries_started.load(Ordering::Relaxed)
    }

    pub fn queries_failed(&self) -> u64 {
        self.queries_failed.load(Ordering::Relaxed)
    }

    pub fn snapshots_succeeded(&self) -> u64 {
        self.snapshots_succeeded.load(Ordering::Relaxed)
    }

    pub fn snapshots_failed(&self) -> u64 {
        self.snapshots_failed.load(Ordering::Relaxed)
    }

    pub fn analyses_failed(&self) -> u64 {
        self.analyses_failed.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.queries_started,
            &self.queries_failed,
            &self.snapshots_succeeded,
            &self.snapshots_failed,
            &self.analyses_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_queries_started();
        m.inc_queries_started();
        m.inc_queries_failed();
        m.inc_snapshots_succeeded();
        m.inc_analyses_failed();
        assert_eq!(m.queries_started(), 2);
        assert_eq!(m.queries_failed(), 1);
        assert_eq!(m.snapshots_succeeded(), 1);
        assert_eq!(m.snapshots_failed(), 0);
        assert_eq!(m.analyses_failed(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_queries_started();
        m.inc_snapshots_failed();
        m.reset();
        assert_eq!(m.queries_started(), 0);
        assert_eq!(m.snapshots_failed(), 0);
    }
}
