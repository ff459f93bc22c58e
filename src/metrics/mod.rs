//! Pipeline metrics.
//!
//! Components never touch process-global counters. Each one receives an
//! `Arc<dyn MetricsSink>` and reports into it:
//! - `PrometheusMetrics`: counters in a private Prometheus registry
//! - `InMemoryMetrics`: plain atomics, handy for tests and run summaries
//! - `NoopMetrics`: discards everything

mod registry;

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use registry::PrometheusMetrics;

/// Observability hooks called by the broker, consumers, handlers and orchestrator
pub trait MetricsSink: Send + Sync {
    /// An event was accepted into a subscriber's live queue
    fn record_published(&self, topic: &str);
    /// An event was dropped because a subscriber's live queue was full
    fn record_dropped(&self, topic: &str);
    /// A handler delivered an event
    fn record_delivered(&self, topic: &str);
    /// A handler invocation failed
    fn record_failed_attempt(&self, topic: &str);
    /// An event was re-enqueued for another try
    fn record_retry(&self, topic: &str);
    /// The DLQ drain consumed an event
    fn record_dead_lettered(&self, topic: &str);
    /// A (user, channel) request was refused by the rate limiter
    fn record_rate_limited(&self, channel: &str);
    /// A request was recognized as a duplicate
    fn record_duplicate(&self);
}

/// Sink that discards every measurement
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_published(&self, _topic: &str) {}
    fn record_dropped(&self, _topic: &str) {}
    fn record_delivered(&self, _topic: &str) {}
    fn record_failed_attempt(&self, _topic: &str) {}
    fn record_retry(&self, _topic: &str) {}
    fn record_dead_lettered(&self, _topic: &str) {}
    fn record_rate_limited(&self, _channel: &str) {}
    fn record_duplicate(&self) {}
}

/// Process-wide totals kept in atomics (no labels)
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    published: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed_attempts: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    rate_limited: AtomicU64,
    duplicates: AtomicU64,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_published(&self, _topic: &str) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self, _topic: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_delivered(&self, _topic: &str) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed_attempt(&self, _topic: &str) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, _topic: &str) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dead_lettered(&self, _topic: &str) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rate_limited(&self, _channel: &str) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of `InMemoryMetrics`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub rate_limited: u64,
    pub duplicates: u64,
}
