use std::sync::Arc;

use crate::broker::{topic_for, Broker, Event, PublishReport};
use crate::error::{Error, Result};
use crate::idempotency::IdempotencyGuard;
use crate::metrics::MetricsSink;
use crate::ratelimit::RateLimiter;
use crate::repository::NotificationRepository;
use crate::rules::{Channels, RuleEngine};

use super::types::{Notification, NotificationEvent, NotificationStatus, UserPreference};

/// What `create_and_queue` did with a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Same request seen before; nothing persisted or published
    Duplicate,
    /// Routing left no channel to deliver on
    NoChannels,
    /// Every resolved channel is over the user's rate limit
    RateLimited,
    /// Persisted and published on `channels`
    Queued {
        channels: Channels,
        report: PublishReport,
    },
}

impl QueueOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, QueueOutcome::Queued { .. })
    }
}

/// Front door of the pipeline: validate, dedupe, route, rate limit,
/// persist, then publish one event per allowed channel.
pub struct NotificationOrchestrator {
    repository: Arc<dyn NotificationRepository>,
    rule_engine: RuleEngine,
    rate_limiter: Arc<RateLimiter>,
    idempotency: IdempotencyGuard,
    broker: Arc<Broker>,
    metrics: Arc<dyn MetricsSink>,
}

impl NotificationOrchestrator {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        rule_engine: RuleEngine,
        rate_limiter: Arc<RateLimiter>,
        idempotency: IdempotencyGuard,
        broker: Arc<Broker>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            repository,
            rule_engine,
            rate_limiter,
            idempotency,
            broker,
            metrics,
        }
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    /// Queue a notification, deduplicating on `user_id:category:title`
    pub async fn create_and_queue(
        &self,
        notification: &mut Notification,
        preferences: Option<&UserPreference>,
    ) -> Result<QueueOutcome> {
        self.create_and_queue_with_key(notification, preferences, None)
            .await
    }

    /// Queue a notification, deduplicating on `idempotency_key` when given.
    ///
    /// The duplicate check and the key store are separate steps, so two
    /// identical requests racing each other can both be queued. The key is
    /// stored only after the notification was persisted.
    #[tracing::instrument(
        name = "orchestrator.create_and_queue",
        skip(self, notification, preferences, idempotency_key),
        fields(
            notification_id = %notification.id,
            user_id = %notification.user_id,
            category = %notification.category,
        )
    )]
    pub async fn create_and_queue_with_key(
        &self,
        notification: &mut Notification,
        preferences: Option<&UserPreference>,
        idempotency_key: Option<&str>,
    ) -> Result<QueueOutcome> {
        validate(notification)?;

        let key = match idempotency_key {
            Some(key) => key.to_string(),
            None => IdempotencyGuard::dedup_key(
                &notification.user_id,
                notification.category,
                &notification.title,
            ),
        };

        if self.idempotency.is_duplicate(&key) {
            self.metrics.record_duplicate();
            tracing::debug!(key = %key, "Duplicate notification request");
            return Ok(QueueOutcome::Duplicate);
        }

        let resolved = self.rule_engine.resolve_channels(notification, preferences);
        if resolved.is_empty() {
            tracing::debug!("No channels resolved for notification");
            return Ok(QueueOutcome::NoChannels);
        }

        let mut channels = Channels::new();
        for channel in resolved {
            if self.rate_limiter.allow(&notification.user_id, channel) {
                channels.push(channel);
            } else {
                self.metrics.record_rate_limited(channel.as_str());
                tracing::debug!(channel = %channel, "Channel rate limited");
            }
        }

        if channels.is_empty() {
            return Ok(QueueOutcome::RateLimited);
        }

        notification.update_status(NotificationStatus::Queued);
        if let Err(e) = self.repository.save_notification(notification).await {
            tracing::error!(error = %e, "Failed to persist notification");
            return Err(Error::Persistence(e));
        }

        self.idempotency.store(key);

        let mut report = PublishReport::default();
        for &channel in &channels {
            let event = Event::notification(
                format!("{}:{}", notification.id, channel),
                NotificationEvent::new(notification, vec![channel]),
            );
            let published = self.broker.publish(&topic_for(channel), event);
            report.subscribers += published.subscribers;
            report.enqueued += published.enqueued;
            report.dropped += published.dropped;
        }

        tracing::debug!(
            channels = channels.len(),
            enqueued = report.enqueued,
            dropped = report.dropped,
            "Notification queued"
        );

        Ok(QueueOutcome::Queued { channels, report })
    }
}

fn validate(notification: &Notification) -> Result<()> {
    if notification.user_id.trim().is_empty() {
        return Err(Error::Validation("user_id must not be empty".to_string()));
    }
    if notification.title.trim().is_empty() {
        return Err(Error::Validation("title must not be empty".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::metrics::InMemoryMetrics;
    use crate::notification::{ChannelType, NotificationCategory};
    use crate::repository::MemoryRepository;

    struct Fixture {
        orchestrator: NotificationOrchestrator,
        repository: Arc<MemoryRepository>,
        metrics: Arc<InMemoryMetrics>,
    }

    fn create_fixture(limit: u32) -> Fixture {
        let repository = Arc::new(MemoryRepository::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let orchestrator = NotificationOrchestrator::new(
            repository.clone(),
            RuleEngine::new(),
            Arc::new(RateLimiter::with_limit(limit, Duration::from_secs(60))),
            IdempotencyGuard::new(),
            Arc::new(Broker::new()),
            metrics.clone(),
        );
        Fixture {
            orchestrator,
            repository,
            metrics,
        }
    }

    fn transaction(user: &str, title: &str) -> Notification {
        Notification::new(user, NotificationCategory::Transaction, title, "body")
    }

    #[tokio::test]
    async fn test_queues_on_default_channels() {
        let f = create_fixture(100);
        let mut n = transaction("user-1", "Order paid");

        let outcome = f.orchestrator.create_and_queue(&mut n, None).await.unwrap();
        match outcome {
            QueueOutcome::Queued { channels, report } => {
                assert_eq!(
                    channels.as_slice(),
                    &[ChannelType::Email, ChannelType::Push, ChannelType::InApp]
                );
                // Nobody subscribed in this fixture
                assert_eq!(report.subscribers, 0);
            }
            other => panic!("expected Queued, got {:?}", other),
        }

        assert_eq!(n.status, NotificationStatus::Queued);
        let stored = f.repository.find_notification(n.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Queued);
    }

    #[tokio::test]
    async fn test_second_identical_request_is_duplicate() {
        let f = create_fixture(100);
        let mut first = transaction("user-1", "Order paid");
        let mut second = transaction("user-1", "Order paid");

        assert!(f.orchestrator.create_and_queue(&mut first, None).await.unwrap().is_queued());
        let outcome = f.orchestrator.create_and_queue(&mut second, None).await.unwrap();

        assert_eq!(outcome, QueueOutcome::Duplicate);
        assert_eq!(second.status, NotificationStatus::Created);
        assert_eq!(f.repository.notification_count(), 1);
        assert_eq!(f.metrics.snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn test_explicit_key_overrides_derived_key() {
        let f = create_fixture(100);
        let mut a = transaction("user-1", "Receipt");
        let mut b = transaction("user-1", "Receipt");

        let first = f
            .orchestrator
            .create_and_queue_with_key(&mut a, None, Some("req-1"))
            .await
            .unwrap();
        let second = f
            .orchestrator
            .create_and_queue_with_key(&mut b, None, Some("req-2"))
            .await
            .unwrap();

        assert!(first.is_queued());
        assert!(second.is_queued());
        assert!(f.orchestrator.idempotency().is_duplicate("req-1"));
    }

    #[tokio::test]
    async fn test_all_channels_rate_limited() {
        let f = create_fixture(1);
        let mut first = transaction("user-1", "One");
        let mut second = transaction("user-1", "Two");

        assert!(f.orchestrator.create_and_queue(&mut first, None).await.unwrap().is_queued());
        let outcome = f.orchestrator.create_and_queue(&mut second, None).await.unwrap();

        assert_eq!(outcome, QueueOutcome::RateLimited);
        assert_eq!(f.repository.notification_count(), 1);
        assert_eq!(f.metrics.snapshot().rate_limited, 3);
    }

    #[tokio::test]
    async fn test_partially_rate_limited_keeps_allowed_channels() {
        let f = create_fixture(1);
        let prefs = UserPreference::new("user-1", vec![ChannelType::Email]);
        let mut email_only = transaction("user-1", "One");
        f.orchestrator
            .create_and_queue(&mut email_only, Some(&prefs))
            .await
            .unwrap();

        // Email is spent; push and in-app still have quota
        let mut n = transaction("user-1", "Two");
        match f.orchestrator.create_and_queue(&mut n, None).await.unwrap() {
            QueueOutcome::Queued { channels, .. } => {
                assert_eq!(channels.as_slice(), &[ChannelType::Push, ChannelType::InApp]);
            }
            other => panic!("expected Queued, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_channels_after_preferences() {
        let f = create_fixture(100);
        let prefs = UserPreference::new("user-1", vec![ChannelType::Sms]);
        let mut n = Notification::new("user-1", NotificationCategory::System, "Maintenance", "");

        let outcome = f
            .orchestrator
            .create_and_queue(&mut n, Some(&prefs))
            .await
            .unwrap();
        assert_eq!(outcome, QueueOutcome::NoChannels);
        assert_eq!(f.repository.notification_count(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_publishes_nothing() {
        let f = create_fixture(100);
        f.repository.set_fail_writes(true);
        let mut n = transaction("user-1", "Order paid");

        let err = f.orchestrator.create_and_queue(&mut n, None).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));

        // Key not stored, so a retry of the same request is not a duplicate
        f.repository.set_fail_writes(false);
        let mut retry = transaction("user-1", "Order paid");
        assert!(f.orchestrator.create_and_queue(&mut retry, None).await.unwrap().is_queued());
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_fields() {
        let f = create_fixture(100);

        let mut no_user = transaction("", "Title");
        assert!(matches!(
            f.orchestrator.create_and_queue(&mut no_user, None).await,
            Err(Error::Validation(_))
        ));

        let mut no_title = transaction("user-1", "  ");
        assert!(matches!(
            f.orchestrator.create_and_queue(&mut no_title, None).await,
            Err(Error::Validation(_))
        ));
        assert_eq!(f.repository.notification_count(), 0);
    }
}
