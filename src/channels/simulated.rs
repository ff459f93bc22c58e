use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;

use crate::notification::{ChannelType, Notification};

use super::{ChannelSender, SendError};

/// Sender that succeeds or fails at random, with no external effects
#[derive(Debug)]
pub struct SimulatedSender {
    channel: ChannelType,
    /// Probability in [0.0, 1.0] that a send fails
    failure_rate: f64,
    healthy: AtomicBool,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl SimulatedSender {
    pub fn new(channel: ChannelType, failure_rate: f64) -> Self {
        Self {
            channel,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            healthy: AtomicBool::new(true),
            sent: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Sender that never fails
    pub fn reliable(channel: ChannelType) -> Self {
        Self::new(channel, 0.0)
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    /// Mark the transport up or down; a down transport fails every call
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChannelSender for SimulatedSender {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    async fn send(&self, notification: &Notification) -> Result<(), SendError> {
        if !self.healthy.load(Ordering::Relaxed) {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::Unavailable {
                channel: self.channel,
                reason: "transport marked unhealthy".to_string(),
            });
        }

        let fail = self.failure_rate > 0.0 && rand::rng().random_bool(self.failure_rate);
        if fail {
            self.failed.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::Transient {
                channel: self.channel,
                reason: format!("simulated failure for notification {}", notification.id),
            });
        }

        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), SendError> {
        if self.healthy.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(SendError::Unavailable {
                channel: self.channel,
                reason: "health check failed".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::NotificationCategory;

    fn create_test_notification() -> Notification {
        Notification::new("user-1", NotificationCategory::Security, "Login", "New device")
    }

    #[tokio::test]
    async fn test_reliable_sender_never_fails() {
        let sender = SimulatedSender::reliable(ChannelType::Email);
        let n = create_test_notification();
        for _ in 0..100 {
            assert!(sender.send(&n).await.is_ok());
        }
        assert_eq!(sender.sent_count(), 100);
        assert_eq!(sender.failed_count(), 0);
    }

    #[tokio::test]
    async fn test_always_failing_sender() {
        let sender = SimulatedSender::new(ChannelType::Sms, 1.0);
        let n = create_test_notification();
        for _ in 0..10 {
            assert!(matches!(
                sender.send(&n).await,
                Err(SendError::Transient { channel: ChannelType::Sms, .. })
            ));
        }
        assert_eq!(sender.failed_count(), 10);
    }

    #[tokio::test]
    async fn test_unhealthy_sender() {
        let sender = SimulatedSender::reliable(ChannelType::Push);
        sender.set_healthy(false);

        assert!(sender.health_check().await.is_err());
        assert!(matches!(
            sender.send(&create_test_notification()).await,
            Err(SendError::Unavailable { .. })
        ));

        sender.set_healthy(true);
        assert!(sender.health_check().await.is_ok());
    }

    #[test]
    fn test_failure_rate_is_clamped() {
        assert_eq!(SimulatedSender::new(ChannelType::InApp, 4.0).failure_rate(), 1.0);
        assert_eq!(SimulatedSender::new(ChannelType::InApp, -1.0).failure_rate(), 0.0);
    }
}
