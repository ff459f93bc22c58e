//! Graceful shutdown of the pipeline.
//!
//! The sequence is:
//! 1. Wait (bounded) for every consumer to finish its queued work
//! 2. Signal workers, DLQ drains and background tasks to stop
//! 3. Join their handles (bounded), aborting whatever is still running

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::broker::Broker;
use crate::config::ShutdownSettings;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time to wait for queued events to reach a terminal outcome (default: 30 seconds)
    pub drain_timeout: Duration,
    /// Time to wait for tasks to exit after the signal (default: 10 seconds)
    pub join_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        Self {
            drain_timeout: settings.drain_timeout(),
            join_timeout: settings.join_timeout(),
        }
    }
}

/// Poll until every consumer on `broker` is idle. Returns false on timeout.
pub async fn wait_for_idle(broker: &Broker, limit: Duration) -> bool {
    let poll = async {
        while !broker.is_idle() {
            tokio::time::sleep(IDLE_POLL_INTERVAL).await;
        }
    };
    timeout(limit, poll).await.is_ok()
}

/// Handles graceful shutdown of the pipeline
pub struct GracefulShutdown {
    broker: Arc<Broker>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(broker: Arc<Broker>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(broker, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        broker: Arc<Broker>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            broker,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(name = "graceful_shutdown", skip(self, handles), fields(tasks = handles.len()))]
    pub async fn execute(&self, reason: &str, handles: Vec<JoinHandle<()>>) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        // Phase 1: Let consumers finish what is already queued
        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Draining queues");
        result.drained = wait_for_idle(&self.broker, self.config.drain_timeout).await;
        if !result.drained {
            tracing::warn!(
                timeout_secs = self.config.drain_timeout.as_secs(),
                "Queue drain timeout, in-flight events may be abandoned"
            );
        }

        // Phase 2: Signal workers and background tasks to stop
        tracing::info!("Phase 2: Signaling workers to stop");
        let _ = self.shutdown_tx.send(());

        // Phase 3: Wait for tasks to exit
        tracing::info!("Phase 3: Joining tasks");
        result.tasks_joined = self.join_tasks(handles).await;

        result.duration = start.elapsed();

        tracing::info!(
            drained = result.drained,
            tasks_joined = result.tasks_joined,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    async fn join_tasks(&self, handles: Vec<JoinHandle<()>>) -> usize {
        let total = handles.len();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let mut pending: FuturesUnordered<_> = handles.into_iter().collect();
        let mut joined = 0;

        let join_future = async {
            while let Some(outcome) = pending.next().await {
                match outcome {
                    Ok(()) => joined += 1,
                    Err(e) => tracing::warn!(error = %e, "Task ended abnormally"),
                }
            }
        };

        if timeout(self.config.join_timeout, join_future).await.is_err() {
            tracing::warn!(
                joined = joined,
                total = total,
                "Join timeout, aborting remaining tasks"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        joined
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    /// Whether every consumer went idle before the drain timeout
    pub drained: bool,
    /// Tasks that exited cleanly after the signal
    pub tasks_joined: usize,
    /// Total time taken for shutdown
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_signals_and_joins_tasks() {
        let broker = Arc::new(Broker::new());
        let (tx, _) = broadcast::channel(1);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let mut rx = tx.subscribe();
                tokio::spawn(async move {
                    let _ = rx.recv().await;
                })
            })
            .collect();

        let result = GracefulShutdown::new(broker, tx).execute("test", handles).await;

        assert!(result.drained);
        assert_eq!(result.tasks_joined, 3);
    }

    #[tokio::test]
    async fn test_stuck_task_is_aborted_after_join_timeout() {
        let broker = Arc::new(Broker::new());
        let (tx, _) = broadcast::channel(1);
        let stuck = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let config = ShutdownConfig {
            drain_timeout: Duration::from_millis(100),
            join_timeout: Duration::from_millis(100),
        };
        let result = GracefulShutdown::with_config(broker, tx, config)
            .execute("test", vec![stuck])
            .await;

        assert_eq!(result.tasks_joined, 0);
        assert!(result.duration < Duration::from_secs(5));
    }

    #[test]
    fn test_shutdown_config_defaults() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.join_timeout, Duration::from_secs(10));
    }
}
