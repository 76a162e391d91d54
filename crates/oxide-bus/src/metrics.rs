//! Metrics for change bus observability.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the change bus.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Total changes published, whether or not anyone was listening.
    pub changes_published: AtomicU64,
    /// Total successful handler invocations.
    pub deliveries: AtomicU64,
    /// Handlers that returned an error.
    pub handler_failures: AtomicU64,
    /// Handlers that panicked.
    pub handler_panics: AtomicU64,
    /// Currently registered consumers across all topics.
    pub subscriptions: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_publish(&self) {
        self.changes_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subscribe(&self) {
        self.subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsubscribe(&self) {
        self.subscriptions.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            changes_published: self.changes_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of bus metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub changes_published: u64,
    pub deliveries: u64,
    pub handler_failures: u64,
    pub handler_panics: u64,
    pub subscriptions: u64,
}

impl MetricsSnapshot {
    /// Failed deliveries of either kind.
    pub fn failed(&self) -> u64 {
        self.handler_failures + self.handler_panics
    }
}
