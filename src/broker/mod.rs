//! Topic-based publish/subscribe broker.
//!
//! # Delivery semantics
//!
//! - `publish` never blocks: each subscriber's live queue gets a `try_send`,
//!   and a full queue drops the event for that subscriber only
//! - Each subscriber retries failed events up to its retry limit, then
//!   dead-letters them (at-least-once attempt, no exactly-once)
//! - No ordering across subscribers; a single consumer's workers run in
//!   parallel, so processing order is not guaranteed either

mod consumer;
mod event;
mod retry;

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;

use crate::notification::ChannelType;

pub use consumer::{Consumer, ConsumerConfig, ConsumerStats, ConsumerStatsSnapshot};
pub use event::{DeliveryError, Event, EventHandler, EventPayload};
pub use retry::{BackoffConfig, RetryAction, RetryPolicy};

/// Topic a channel's events are published to, e.g. `email-notifications`
pub fn topic_for(channel: ChannelType) -> String {
    format!("{}-notifications", channel.as_str())
}

/// Outcome of a single `publish` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Consumers subscribed to the topic at publish time
    pub subscribers: usize,
    /// Consumers that accepted the event
    pub enqueued: usize,
    /// Consumers whose queue was full or closed
    pub dropped: usize,
}

/// Registry of topic subscriptions
#[derive(Default)]
pub struct Broker {
    topics: DashMap<String, Vec<Arc<Consumer>>>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer under a topic.
    ///
    /// Subscribing the same consumer instance twice is a no-op; returns
    /// whether the consumer was newly added.
    pub fn subscribe(&self, topic: &str, consumer: Arc<Consumer>) -> bool {
        let mut subscribers = self.topics.entry(topic.to_string()).or_default();
        if subscribers.iter().any(|c| Arc::ptr_eq(c, &consumer)) {
            return false;
        }

        tracing::info!(
            topic = %topic,
            consumer = %consumer.name(),
            subscribers = subscribers.len() + 1,
            "Consumer subscribed"
        );
        subscribers.push(consumer);
        true
    }

    /// Remove every consumer of a topic, returning how many were removed
    pub fn unsubscribe_all(&self, topic: &str) -> usize {
        self.topics
            .remove(topic)
            .map(|(_, subscribers)| subscribers.len())
            .unwrap_or(0)
    }

    /// Offer an event to every consumer of `topic` without blocking
    pub fn publish(&self, topic: &str, event: Event) -> PublishReport {
        let Some(subscribers) = self.topics.get(topic) else {
            tracing::trace!(topic = %topic, event_id = %event.id, "No subscribers for topic");
            return PublishReport::default();
        };

        let mut report = PublishReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };

        for consumer in subscribers.iter() {
            match consumer.offer(event.clone()) {
                Ok(()) => report.enqueued += 1,
                Err(TrySendError::Full(dropped)) => {
                    report.dropped += 1;
                    tracing::warn!(
                        topic = %topic,
                        consumer = %consumer.name(),
                        event_id = %dropped.id,
                        "Subscriber queue full, dropping event"
                    );
                }
                Err(TrySendError::Closed(dropped)) => {
                    report.dropped += 1;
                    tracing::warn!(
                        topic = %topic,
                        consumer = %consumer.name(),
                        event_id = %dropped.id,
                        "Subscriber queue closed, dropping event"
                    );
                }
            }
        }

        report
    }

    /// Topics with at least one subscriber
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// True when no subscribed consumer has an event in flight or queued
    pub fn is_idle(&self) -> bool {
        self.topics
            .iter()
            .all(|entry| entry.value().iter().all(|c| c.is_idle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::metrics::NoopMetrics;
    use crate::notification::{Notification, NotificationCategory, NotificationEvent};

    struct AcceptAll;

    #[async_trait]
    impl EventHandler for AcceptAll {
        async fn handle(&self, _event: &Event) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn create_consumer(name: &str, queue_capacity: usize) -> Arc<Consumer> {
        let config = ConsumerConfig {
            queue_capacity,
            ..Default::default()
        };
        Arc::new(Consumer::new(name, config, Arc::new(AcceptAll), Arc::new(NoopMetrics)))
    }

    fn create_test_event(id: &str) -> Event {
        let n = Notification::new("user-1", NotificationCategory::Marketing, "Sale", "Now");
        Event::notification(id, NotificationEvent::new(&n, vec![ChannelType::Email]))
    }

    #[test]
    fn test_topic_naming() {
        assert_eq!(topic_for(ChannelType::Email), "email-notifications");
        assert_eq!(topic_for(ChannelType::InApp), "inapp-notifications");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let broker = Broker::new();
        let report = broker.publish("nobody-listens", create_test_event("evt-1"));
        assert_eq!(report, PublishReport::default());
    }

    #[test]
    fn test_subscribe_is_idempotent_per_instance() {
        let broker = Broker::new();
        let consumer = create_consumer("email", 10);

        assert!(broker.subscribe("email-notifications", consumer.clone()));
        assert!(!broker.subscribe("email-notifications", consumer.clone()));
        assert_eq!(broker.subscriber_count("email-notifications"), 1);

        // A distinct instance is a separate subscriber
        assert!(broker.subscribe("email-notifications", create_consumer("email-2", 10)));
        assert_eq!(broker.subscriber_count("email-notifications"), 2);
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_every_subscriber() {
        let broker = Broker::new();
        let first = create_consumer("first", 10);
        let second = create_consumer("second", 10);
        broker.subscribe("email-notifications", first.clone());
        broker.subscribe("email-notifications", second.clone());

        let report = broker.publish("email-notifications", create_test_event("evt-1"));
        assert_eq!(report.subscribers, 2);
        assert_eq!(report.enqueued, 2);
        assert_eq!(first.queue_depth(), 1);
        assert_eq!(second.queue_depth(), 1);
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_affect_others() {
        let broker = Broker::new();
        let small = create_consumer("small", 1);
        let large = create_consumer("large", 10);
        broker.subscribe("push-notifications", small.clone());
        broker.subscribe("push-notifications", large.clone());

        broker.publish("push-notifications", create_test_event("evt-1"));
        let report = broker.publish("push-notifications", create_test_event("evt-2"));

        assert_eq!(report.enqueued, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(small.stats().dropped, 1);
        assert_eq!(large.queue_depth(), 2);
    }

    #[tokio::test]
    async fn test_idle_tracks_queued_events() {
        let broker = Broker::new();
        broker.subscribe("inapp-notifications", create_consumer("inapp", 10));
        assert!(broker.is_idle());

        broker.publish("inapp-notifications", create_test_event("evt-1"));
        assert!(!broker.is_idle());
    }

    #[test]
    fn test_unsubscribe_all() {
        let broker = Broker::new();
        broker.subscribe("sms-notifications", create_consumer("a", 1));
        broker.subscribe("sms-notifications", create_consumer("b", 1));

        assert_eq!(broker.topics(), vec!["sms-notifications".to_string()]);
        assert_eq!(broker.unsubscribe_all("sms-notifications"), 2);
        assert!(broker.topics().is_empty());

        let report = broker.publish("sms-notifications", create_test_event("evt-1"));
        assert_eq!(report.subscribers, 0);
        assert_eq!(report.enqueued, 0);
        assert!(broker.is_idle());
    }
}
