//! Prometheus-backed metrics sink

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use super::MetricsSink;

/// Prefix for all metrics
const METRIC_PREFIX: &str = "fanout";

/// Metrics sink that owns its own Prometheus registry.
///
/// Nothing is registered globally, so several pipelines (or tests) can run
/// side by side in one process.
pub struct PrometheusMetrics {
    registry: Registry,
    events_published: IntCounterVec,
    events_dropped: IntCounterVec,
    events_delivered: IntCounterVec,
    delivery_failures: IntCounterVec,
    events_retried: IntCounterVec,
    events_dead_lettered: IntCounterVec,
    ratelimit_denied: IntCounterVec,
    duplicates: IntCounter,
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<IntCounterVec, prometheus::Error> {
    let counter = IntCounterVec::new(
        Opts::new(format!("{}_{}", METRIC_PREFIX, name), help),
        &[label],
    )?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PrometheusMetrics {
    /// Create the sink and register every counter in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_published = counter_vec(
            &registry,
            "events_published_total",
            "Events accepted into a consumer queue",
            "topic",
        )?;
        let events_dropped = counter_vec(
            &registry,
            "events_dropped_total",
            "Events dropped because a consumer queue was full",
            "topic",
        )?;
        let events_delivered = counter_vec(
            &registry,
            "events_delivered_total",
            "Events delivered by a channel handler",
            "topic",
        )?;
        let delivery_failures = counter_vec(
            &registry,
            "delivery_failures_total",
            "Failed handler invocations",
            "topic",
        )?;
        let events_retried = counter_vec(
            &registry,
            "events_retried_total",
            "Events re-enqueued for another delivery attempt",
            "topic",
        )?;
        let events_dead_lettered = counter_vec(
            &registry,
            "events_dead_lettered_total",
            "Events that exhausted their retries",
            "topic",
        )?;
        let ratelimit_denied = counter_vec(
            &registry,
            "ratelimit_denied_total",
            "Requests refused by the per-user channel rate limiter",
            "channel",
        )?;

        let duplicates = IntCounter::new(
            format!("{}_duplicates_total", METRIC_PREFIX),
            "Notification requests rejected as duplicates",
        )?;
        registry.register(Box::new(duplicates.clone()))?;

        Ok(Self {
            registry,
            events_published,
            events_dropped,
            events_delivered,
            delivery_failures,
            events_retried,
            events_dead_lettered,
            ratelimit_denied,
            duplicates,
        })
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_published(&self, topic: &str) {
        self.events_published.with_label_values(&[topic]).inc();
    }

    fn record_dropped(&self, topic: &str) {
        self.events_dropped.with_label_values(&[topic]).inc();
    }

    fn record_delivered(&self, topic: &str) {
        self.events_delivered.with_label_values(&[topic]).inc();
    }

    fn record_failed_attempt(&self, topic: &str) {
        self.delivery_failures.with_label_values(&[topic]).inc();
    }

    fn record_retry(&self, topic: &str) {
        self.events_retried.with_label_values(&[topic]).inc();
    }

    fn record_dead_lettered(&self, topic: &str) {
        self.events_dead_lettered.with_label_values(&[topic]).inc();
    }

    fn record_rate_limited(&self, channel: &str) {
        self.ratelimit_denied.with_label_values(&[channel]).inc();
    }

    fn record_duplicate(&self) {
        self.duplicates.inc();
    }
}
