use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::broker::{DeliveryError, Event, EventHandler, EventPayload};
use crate::channels::ChannelSender;
use crate::repository::NotificationRepository;

use super::types::{ChannelType, DeliveryAttempt, DeliveryStatus};

/// Event handler that delivers notifications through one channel sender.
///
/// Keeps exactly one `DeliveryAttempt` per (notification, channel): the
/// first try creates it, every retry updates it. Bookkeeping failures are
/// logged and never fail the delivery itself.
pub struct DeliveryHandler {
    sender: Arc<dyn ChannelSender>,
    repository: Arc<dyn NotificationRepository>,
}

impl DeliveryHandler {
    pub fn new(sender: Arc<dyn ChannelSender>, repository: Arc<dyn NotificationRepository>) -> Self {
        Self { sender, repository }
    }

    pub fn channel(&self) -> ChannelType {
        self.sender.channel()
    }

    async fn load_attempt(&self, notification_id: Uuid, channel: ChannelType) -> DeliveryAttempt {
        match self
            .repository
            .find_delivery_attempt(notification_id, channel)
            .await
        {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                let attempt = DeliveryAttempt::new(notification_id, channel);
                if let Err(e) = self.repository.save_delivery_attempt(&attempt).await {
                    tracing::warn!(
                        notification_id = %notification_id,
                        channel = %channel,
                        error = %e,
                        "Failed to save delivery attempt"
                    );
                }
                attempt
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification_id,
                    channel = %channel,
                    error = %e,
                    "Failed to load delivery attempt, starting a fresh record"
                );
                DeliveryAttempt::new(notification_id, channel)
            }
        }
    }
}

#[async_trait]
impl EventHandler for DeliveryHandler {
    async fn handle(&self, event: &Event) -> Result<(), DeliveryError> {
        let payload = match &event.payload {
            EventPayload::Notification(payload) => payload,
        };

        let channel = self.sender.channel();
        if !payload.channels.contains(&channel) {
            return Err(DeliveryError::InvalidPayload(format!(
                "event {} is not routed to {}",
                event.id, channel
            )));
        }

        let notification = &payload.notification;
        let mut attempt = self.load_attempt(notification.id, channel).await;
        attempt.increment_attempt();

        let result = self.sender.send(notification).await;
        attempt.status = match result {
            Ok(()) => DeliveryStatus::Success,
            Err(_) => DeliveryStatus::Failed,
        };

        if let Err(e) = self.repository.update_delivery_attempt(&attempt).await {
            tracing::warn!(
                notification_id = %notification.id,
                channel = %channel,
                attempt = attempt.attempt_count,
                error = %e,
                "Failed to update delivery attempt"
            );
        }

        tracing::trace!(
            event_id = %event.id,
            channel = %channel,
            attempt = attempt.attempt_count,
            status = ?attempt.status,
            "Delivery attempt finished"
        );

        result.map_err(DeliveryError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::SimulatedSender;
    use crate::notification::{Notification, NotificationCategory, NotificationEvent};
    use crate::repository::MemoryRepository;

    fn create_event(n: &Notification, channel: ChannelType) -> Event {
        Event::notification(
            format!("{}:{}", n.id, channel),
            NotificationEvent::new(n, vec![channel]),
        )
    }

    #[tokio::test]
    async fn test_success_records_single_attempt() {
        let repo = Arc::new(MemoryRepository::new());
        let sender = Arc::new(SimulatedSender::reliable(ChannelType::Email));
        let handler = DeliveryHandler::new(sender.clone(), repo.clone());
        let n = Notification::new("user-1", NotificationCategory::Transaction, "Paid", "Thanks");

        handler.handle(&create_event(&n, ChannelType::Email)).await.unwrap();

        let attempt = repo
            .find_delivery_attempt(n.id, ChannelType::Email)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt.attempt_count, 1);
        assert_eq!(attempt.status, DeliveryStatus::Success);
        assert_eq!(sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_update_the_same_record() {
        let repo = Arc::new(MemoryRepository::new());
        let sender = Arc::new(SimulatedSender::new(ChannelType::Sms, 1.0));
        let handler = DeliveryHandler::new(sender, repo.clone());
        let n = Notification::new("user-1", NotificationCategory::Security, "Code", "1234");
        let mut event = create_event(&n, ChannelType::Sms);

        for retries in 0..3 {
            event.retries = retries;
            assert!(matches!(
                handler.handle(&event).await,
                Err(DeliveryError::Send(_))
            ));
        }

        let attempts = repo.delivery_attempts(n.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_count, 3);
        assert_eq!(attempts[0].status, DeliveryStatus::Failed);
    }

    #[tokio::test]
    async fn test_rejects_event_for_other_channel() {
        let repo = Arc::new(MemoryRepository::new());
        let sender = Arc::new(SimulatedSender::reliable(ChannelType::Push));
        let handler = DeliveryHandler::new(sender.clone(), repo.clone());
        let n = Notification::new("user-1", NotificationCategory::System, "Up", "All good");

        let result = handler.handle(&create_event(&n, ChannelType::InApp)).await;
        assert!(matches!(result, Err(DeliveryError::InvalidPayload(_))));
        assert_eq!(sender.sent_count(), 0);
        assert_eq!(repo.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_does_not_fail_delivery() {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_fail_writes(true);
        let handler = DeliveryHandler::new(
            Arc::new(SimulatedSender::reliable(ChannelType::InApp)),
            repo.clone(),
        );
        let n = Notification::new("user-1", NotificationCategory::System, "Up", "All good");

        assert!(handler.handle(&create_event(&n, ChannelType::InApp)).await.is_ok());
        assert_eq!(repo.attempt_count(), 0);
    }
}
