//! Engine counters exposed on `/metrics`

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    items_discovered: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    publishes_completed: AtomicU64,
    publishes_failed: AtomicU64,
    retries_scheduled: AtomicU64,
    entries_abandoned: AtomicU64,
    invalid_transitions: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_discovered(&self) {
        self.items_discovered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "items_discovered", "Metric incremented");
    }

    pub fn download_completed(&self) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "downloads_completed", "Metric incremented");
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "downloads_failed", "Metric incremented");
    }

    pub fn publish_completed(&self) {
        self.publishes_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "publishes_completed", "Metric incremented");
    }

    pub fn publish_failed(&self) {
        self.publishes_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "publishes_failed", "Metric incremented");
    }

    pub fn retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "retries_scheduled", "Metric incremented");
    }

    pub fn entry_abandoned(&self) {
        self.entries_abandoned.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "entries_abandoned", "Metric incremented");
    }

    pub fn invalid_transition(&self) {
        self.invalid_transitions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "invalid_transitions", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_discovered: self.items_discovered.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            publishes_completed: self.publishes_completed.load(Ordering::Relaxed),
            publishes_failed: self.publishes_failed.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            entries_abandoned: self.entries_abandoned.load(Ordering::Relaxed),
            invalid_transitions: self.invalid_transitions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub items_discovered: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub publishes_completed: u64,
    pub publishes_failed: u64,
    pub retries_scheduled: u64,
    pub entries_abandoned: u64,
    pub invalid_transitions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.item_discovered();
        metrics.item_discovered();
        metrics.publish_completed();
        metrics.entry_abandoned();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.items_discovered, 2);
        assert_eq!(snapshot.publishes_completed, 1);
        assert_eq!(snapshot.entries_abandoned, 1);
        assert_eq!(snapshot.retries_scheduled, 0);
    }
}
