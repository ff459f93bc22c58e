//! Topic consumer: bounded live queue, worker pool, retry and dead-letter path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::metrics::MetricsSink;

use super::event::{Event, EventHandler};
use super::retry::{RetryAction, RetryPolicy};

/// Sizing and retry settings for one consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Capacity of the live queue
    pub queue_capacity: usize,
    /// Capacity of the dead-letter queue
    pub dlq_capacity: usize,
    /// Number of concurrent workers draining the live queue
    pub worker_count: usize,
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            dlq_capacity: 1024,
            worker_count: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Counters for a single consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Handler invocations
    pub handled: AtomicU64,
    pub delivered: AtomicU64,
    pub failed_attempts: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
    /// Rejected by `offer` because the live queue was full or closed
    pub dropped: AtomicU64,
    /// Given up during shutdown while waiting to retry or dead-letter
    pub abandoned: AtomicU64,
    /// Accepted events that have not reached a terminal outcome yet
    pub outstanding: AtomicU64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Acquire),
        }
    }
}

/// Snapshot of consumer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub handled: u64,
    pub delivered: u64,
    pub failed_attempts: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub dropped: u64,
    pub abandoned: u64,
    pub outstanding: u64,
}

impl ConsumerStatsSnapshot {
    /// Fold another snapshot into this one
    pub fn merge(&mut self, other: &ConsumerStatsSnapshot) {
        self.handled += other.handled;
        self.delivered += other.delivered;
        self.failed_attempts += other.failed_attempts;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.dropped += other.dropped;
        self.abandoned += other.abandoned;
        self.outstanding += other.outstanding;
    }
}

/// Consumes the events published to one topic.
///
/// Workers share a single receiver. A failed event is either pushed back
/// onto the live queue (competing with fresh events) or, once its retries
/// are exhausted, moved to the dead-letter queue. Dead-lettered events are
/// never re-queued.
pub struct Consumer {
    name: String,
    config: ConsumerConfig,
    queue_tx: mpsc::Sender<Event>,
    queue_rx: Mutex<mpsc::Receiver<Event>>,
    dlq_tx: mpsc::Sender<Event>,
    dlq_rx: Mutex<mpsc::Receiver<Event>>,
    handler: Arc<dyn EventHandler>,
    metrics: Arc<dyn MetricsSink>,
    stats: ConsumerStats,
}

impl Consumer {
    /// Create a consumer. Zero capacities or worker counts are raised to one.
    pub fn new(
        name: impl Into<String>,
        config: ConsumerConfig,
        handler: Arc<dyn EventHandler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let config = ConsumerConfig {
            queue_capacity: config.queue_capacity.max(1),
            dlq_capacity: config.dlq_capacity.max(1),
            worker_count: config.worker_count.max(1),
            retry: config.retry,
        };
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (dlq_tx, dlq_rx) = mpsc::channel(config.dlq_capacity);

        Self {
            name: name.into(),
            config,
            queue_tx,
            queue_rx: Mutex::new(queue_rx),
            dlq_tx,
            dlq_rx: Mutex::new(dlq_rx),
            handler,
            metrics,
            stats: ConsumerStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Events waiting in the live queue
    pub fn queue_depth(&self) -> usize {
        self.config.queue_capacity - self.queue_tx.capacity()
    }

    /// Events waiting in the dead-letter queue
    pub fn dlq_depth(&self) -> usize {
        self.config.dlq_capacity - self.dlq_tx.capacity()
    }

    /// True once every accepted event reached a terminal outcome
    pub fn is_idle(&self) -> bool {
        self.stats.outstanding.load(Ordering::Acquire) == 0
    }

    /// Try to put an event on the live queue without waiting.
    ///
    /// A full queue hands the event back inside the error.
    pub fn offer(&self, event: Event) -> Result<(), TrySendError<Event>> {
        self.stats.outstanding.fetch_add(1, Ordering::AcqRel);
        match self.queue_tx.try_send(event) {
            Ok(()) => {
                self.metrics.record_published(&self.name);
                Ok(())
            }
            Err(e) => {
                self.stats.outstanding.fetch_sub(1, Ordering::AcqRel);
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_dropped(&self.name);
                Err(e)
            }
        }
    }

    /// Launch the worker pool. Workers stop at their next wait once
    /// `shutdown` fires (or its sender is dropped).
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            consumer = %self.name,
            workers = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            retry_limit = self.config.retry.retry_limit,
            "Starting consumer workers"
        );

        (0..self.config.worker_count)
            .map(|worker_id| {
                let consumer = Arc::clone(self);
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { consumer.run_worker(worker_id, shutdown).await })
            })
            .collect()
    }

    /// Launch the task that drains the dead-letter queue into the counters
    pub fn start_dlq_drain(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> JoinHandle<()> {
        let consumer = Arc::clone(self);
        let shutdown = shutdown.subscribe();
        tokio::spawn(async move { consumer.run_dlq_drain(shutdown).await })
    }

    async fn run_worker(self: Arc<Self>, worker_id: usize, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => break,
                event = async { self.queue_rx.lock().await.recv().await } => event,
            };
            let Some(event) = next else {
                break;
            };

            self.stats.handled.fetch_add(1, Ordering::Relaxed);
            match self.handler.handle(&event).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                    self.stats.outstanding.fetch_sub(1, Ordering::AcqRel);
                    self.metrics.record_delivered(&self.name);
                }
                Err(e) => {
                    self.stats.failed_attempts.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_failed_attempt(&self.name);
                    tracing::debug!(
                        consumer = %self.name,
                        event_id = %event.id,
                        retries = event.retries,
                        error = %e,
                        "Event handler failed"
                    );
                    if !self.handle_failure(event, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        tracing::debug!(consumer = %self.name, worker_id, "Consumer worker stopped");
    }

    /// Route a failed event. Returns false if shutdown fired while waiting.
    async fn handle_failure(&self, mut event: Event, shutdown: &mut broadcast::Receiver<()>) -> bool {
        match self.config.retry.next_action(event.retries) {
            RetryAction::Retry { delay } => {
                if let Some(delay) = delay {
                    tokio::select! {
                        _ = shutdown.recv() => {
                            self.abandon(&event, "retry backoff");
                            return false;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                event.retries += 1;
                self.stats.retried.fetch_add(1, Ordering::Relaxed);
                self.metrics.record_retry(&self.name);

                // Blocks while the live queue is full
                let id = event.id.clone();
                tokio::select! {
                    _ = shutdown.recv() => {
                        self.abandon_id(&id, "retry enqueue");
                        false
                    }
                    sent = self.queue_tx.send(event) => {
                        if let Err(mpsc::error::SendError(event)) = sent {
                            self.abandon(&event, "retry enqueue");
                        }
                        true
                    }
                }
            }
            RetryAction::DeadLetter => {
                tracing::warn!(
                    consumer = %self.name,
                    event_id = %event.id,
                    retries = event.retries,
                    "Retries exhausted, moving event to dead-letter queue"
                );

                let id = event.id.clone();
                tokio::select! {
                    _ = shutdown.recv() => {
                        self.abandon_id(&id, "dead-letter enqueue");
                        false
                    }
                    sent = self.dlq_tx.send(event) => {
                        if let Err(mpsc::error::SendError(event)) = sent {
                            self.abandon(&event, "dead-letter enqueue");
                        }
                        true
                    }
                }
            }
        }
    }

    fn abandon(&self, event: &Event, stage: &str) {
        self.abandon_id(&event.id, stage);
    }

    fn abandon_id(&self, event_id: &str, stage: &str) {
        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
        self.stats.outstanding.fetch_sub(1, Ordering::AcqRel);
        tracing::warn!(
            consumer = %self.name,
            event_id = %event_id,
            stage = stage,
            "Abandoning event during shutdown"
        );
    }

    async fn run_dlq_drain(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let next = tokio::select! {
                _ = shutdown.recv() => break,
                event = async { self.dlq_rx.lock().await.recv().await } => event,
            };
            let Some(event) = next else {
                break;
            };

            let total = self.stats.dead_lettered.fetch_add(1, Ordering::Relaxed) + 1;
            self.stats.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.metrics.record_dead_lettered(&self.name);

            tracing::debug!(
                consumer = %self.name,
                event_id = %event.id,
                retries = event.retries,
                dead_lettered_total = total,
                "Event dead-lettered"
            );
        }

        tracing::debug!(consumer = %self.name, "Dead-letter drain stopped");
    }
}
