//! In-memory repository backend using DashMap.
//!
//! Records live for the lifetime of the process. Used by the simulation
//! binary and by tests; production deployments plug a durable store in
//! behind the same trait.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::notification::{ChannelType, DeliveryAttempt, Notification};

use super::backend::{NotificationRepository, RepositoryError};

/// In-memory notification store.
///
/// Attempts are keyed by (notification, channel), which is what keeps a
/// single attempt record per channel.
#[derive(Default)]
pub struct MemoryRepository {
    notifications: DashMap<Uuid, Notification>,
    attempts: DashMap<(Uuid, ChannelType), DeliveryAttempt>,
    /// When set, every write fails with `Unavailable`
    fail_writes: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle simulated storage outage
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(RepositoryError::Unavailable(
                "memory repository is rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for MemoryRepository {
    async fn save_notification(&self, notification: &Notification) -> Result<(), RepositoryError> {
        self.check_writable()?;

        match self.notifications.entry(notification.id) {
            Entry::Occupied(_) => {
                Err(RepositoryError::Duplicate(format!("notification {}", notification.id)))
            }
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(())
            }
        }
    }

    async fn find_notification(&self, id: Uuid) -> Result<Option<Notification>, RepositoryError> {
        Ok(self.notifications.get(&id).map(|n| n.clone()))
    }

    async fn save_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), RepositoryError> {
        self.check_writable()?;

        let key = (attempt.notification_id, attempt.channel);
        match self.attempts.entry(key) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate(format!(
                "attempt {}:{}",
                attempt.notification_id, attempt.channel
            ))),
            Entry::Vacant(slot) => {
                slot.insert(attempt.clone());
                Ok(())
            }
        }
    }

    async fn update_delivery_attempt(
        &self,
        attempt: &DeliveryAttempt,
    ) -> Result<(), RepositoryError> {
        self.check_writable()?;

        let key = (attempt.notification_id, attempt.channel);
        match self.attempts.get_mut(&key) {
            Some(mut existing) => {
                *existing = attempt.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "attempt {}:{}",
                attempt.notification_id, attempt.channel
            ))),
        }
    }

    async fn find_delivery_attempt(
        &self,
        notification_id: Uuid,
        channel: ChannelType,
    ) -> Result<Option<DeliveryAttempt>, RepositoryError> {
        Ok(self
            .attempts
            .get(&(notification_id, channel))
            .map(|a| a.clone()))
    }

    async fn delivery_attempts(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, RepositoryError> {
        Ok(self
            .attempts
            .iter()
            .filter(|entry| entry.key().0 == notification_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
