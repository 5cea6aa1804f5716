//! Pipeline counters, updated atomically from the coordinator and the
//! publisher lanes. All operations are lock-free.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Events handed to `ingest` since startup.
    pub ingested_total: AtomicU64,
    /// Events acked by the broker.
    pub acked_total: AtomicU64,
    /// Events that reached a terminal failure.
    pub failed_total: AtomicU64,
    /// Publish retries performed.
    pub retries_total: AtomicU64,
    /// Events rejected by per-kind validation.
    pub validation_errors_total: AtomicU64,
    /// Non-fatal enrichment failures.
    pub inference_errors_total: AtomicU64,
    /// Events failed because shutdown preempted them.
    pub shutdown_failures_total: AtomicU64,
}

impl PipelineMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an immutable snapshot for reporting.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ingested_total: self.ingested_total.load(Ordering::Relaxed),
            acked_total: self.acked_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            validation_errors_total: self.validation_errors_total.load(Ordering::Relaxed),
            inference_errors_total: self.inference_errors_total.load(Ordering::Relaxed),
            shutdown_failures_total: self.shutdown_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of [`PipelineMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Events handed to `ingest` since startup.
    pub ingested_total: u64,
    /// Events acked by the broker.
    pub acked_total: u64,
    /// Events that reached a terminal failure.
    pub failed_total: u64,
    /// Publish retries performed.
    pub retries_total: u64,
    /// Events rejected by per-kind validation.
    pub validation_errors_total: u64,
    /// Non-fatal enrichment failures.
    pub inference_errors_total: u64,
    /// Events failed because shutdown preempted them.
    pub shutdown_failures_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let snap = PipelineMetrics::new().snapshot();
        assert_eq!(snap.ingested_total, 0);
        assert_eq!(snap.acked_total, 0);
        assert_eq!(snap.failed_total, 0);
        assert_eq!(snap.retries_total, 0);
    }

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PipelineMetrics::new();
        metrics.ingested_total.fetch_add(3, Ordering::Relaxed);
        metrics.acked_total.fetch_add(2, Ordering::Relaxed);
        metrics.failed_total.fetch_add(1, Ordering::Relaxed);
        metrics.retries_total.fetch_add(4, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.ingested_total, 3);
        assert_eq!(snap.acked_total, 2);
        assert_eq!(snap.failed_total, 1);
        assert_eq!(snap.retries_total, 4);
    }
}
