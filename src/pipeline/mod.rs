//! Wires every component of the fan-out pipeline from `Settings`.
//!
//! One consumer per channel sender, subscribed to that channel's topic,
//! each running its own worker pool and dead-letter drain.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::broker::{topic_for, Broker, Consumer, ConsumerStatsSnapshot};
use crate::channels::ChannelSender;
use crate::config::Settings;
use crate::idempotency::IdempotencyGuard;
use crate::metrics::MetricsSink;
use crate::notification::{DeliveryHandler, NotificationOrchestrator};
use crate::ratelimit::{RateLimiter, RateLimiterStats};
use crate::repository::NotificationRepository;
use crate::rules::RuleEngine;
use crate::shutdown::{wait_for_idle, GracefulShutdown, ShutdownConfig, ShutdownResult};
use crate::tasks::RateLimitCleanupTask;

/// Counters of one consumer, labelled with its topic
#[derive(Debug, Clone, Serialize)]
pub struct TopicStats {
    pub topic: String,
    pub queue_depth: usize,
    pub dlq_depth: usize,
    #[serde(flatten)]
    pub stats: ConsumerStatsSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub topics: Vec<TopicStats>,
    /// Sum over every topic
    pub totals: ConsumerStatsSnapshot,
    pub rate_limiter: RateLimiterStats,
    pub idempotency_keys: usize,
}

pub struct Pipeline {
    settings: Settings,
    broker: Arc<Broker>,
    rate_limiter: Arc<RateLimiter>,
    orchestrator: Arc<NotificationOrchestrator>,
    consumers: Vec<Arc<Consumer>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
    started: bool,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        repository: Arc<dyn NotificationRepository>,
        senders: Vec<Arc<dyn ChannelSender>>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let broker = Arc::new(Broker::new());
        let rate_limiter = Arc::new(RateLimiter::new(settings.rate_limit.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        let mut consumers = Vec::with_capacity(senders.len());
        for sender in senders {
            let topic = topic_for(sender.channel());
            let handler = Arc::new(DeliveryHandler::new(sender, repository.clone()));
            let consumer = Arc::new(Consumer::new(
                topic.clone(),
                settings.pipeline.consumer_config(&topic),
                handler,
                metrics.clone(),
            ));
            if broker.subscribe(&topic, consumer.clone()) {
                consumers.push(consumer);
            }
        }

        let orchestrator = Arc::new(NotificationOrchestrator::new(
            repository,
            RuleEngine::new(),
            rate_limiter.clone(),
            IdempotencyGuard::new(),
            broker.clone(),
            metrics,
        ));

        Self {
            settings,
            broker,
            rate_limiter,
            orchestrator,
            consumers,
            shutdown_tx,
            handles: Vec::new(),
            started: false,
        }
    }

    /// Start every consumer, its dead-letter drain, and the rate limiter
    /// cleanup task. Calling it again does nothing.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;

        for consumer in &self.consumers {
            self.handles.extend(consumer.start(&self.shutdown_tx));
            self.handles.push(consumer.start_dlq_drain(&self.shutdown_tx));
        }

        if self.rate_limiter.is_enabled() {
            let task = RateLimitCleanupTask::new(
                self.rate_limiter.clone(),
                Duration::from_secs(self.settings.rate_limit.cleanup_interval_seconds),
                self.shutdown_tx.subscribe(),
            );
            self.handles.push(tokio::spawn(task.run()));
        }

        tracing::info!(
            topics = self.consumers.len(),
            tasks = self.handles.len(),
            "Pipeline started"
        );
    }

    pub fn orchestrator(&self) -> &Arc<NotificationOrchestrator> {
        &self.orchestrator
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stats(&self) -> PipelineStats {
        let mut totals = ConsumerStatsSnapshot::default();
        let topics = self
            .consumers
            .iter()
            .map(|consumer| {
                let stats = consumer.stats();
                totals.merge(&stats);
                TopicStats {
                    topic: consumer.name().to_string(),
                    queue_depth: consumer.queue_depth(),
                    dlq_depth: consumer.dlq_depth(),
                    stats,
                }
            })
            .collect();

        PipelineStats {
            topics,
            totals,
            rate_limiter: self.rate_limiter.stats(),
            idempotency_keys: self.orchestrator.idempotency().len(),
        }
    }

    /// Wait until every accepted event is delivered or dead-lettered.
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        wait_for_idle(&self.broker, timeout).await
    }

    /// Drain, signal and join everything `start` launched
    pub async fn shutdown(self, reason: &str) -> ShutdownResult {
        let config = ShutdownConfig::from(&self.settings.shutdown);
        GracefulShutdown::with_config(self.broker, self.shutdown_tx, config)
            .execute(reason, self.handles)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SimulatedSender;
    use crate::metrics::NoopMetrics;
    use crate::notification::ChannelType;
    use crate::repository::MemoryRepository;

    fn create_pipeline(senders: Vec<Arc<dyn ChannelSender>>) -> Pipeline {
        let mut settings = Settings::default();
        settings.pipeline.worker_count = 2;
        settings.pipeline.queue_capacity = 64;
        settings.pipeline.dlq_capacity = 64;
        Pipeline::new(
            settings,
            Arc::new(MemoryRepository::new()),
            senders,
            Arc::new(NoopMetrics),
        )
    }

    #[test]
    fn test_one_consumer_per_channel() {
        let pipeline = create_pipeline(
            ChannelType::ALL
                .iter()
                .map(|ch| Arc::new(SimulatedSender::reliable(*ch)) as Arc<dyn ChannelSender>)
                .collect(),
        );

        let mut topics = pipeline.broker().topics();
        topics.sort();
        assert_eq!(
            topics,
            vec![
                "email-notifications",
                "inapp-notifications",
                "push-notifications",
                "sms-notifications"
            ]
        );
        assert_eq!(pipeline.stats().topics.len(), 4);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_joins_all() {
        let mut pipeline = create_pipeline(vec![Arc::new(SimulatedSender::reliable(
            ChannelType::Email,
        ))]);

        pipeline.start();
        pipeline.start();
        // 2 workers + DLQ drain + cleanup task
        assert_eq!(pipeline.handles.len(), 4);

        let result = pipeline.shutdown("test").await;
        assert!(result.drained);
        assert_eq!(result.tasks_joined, 4);
    }
}
