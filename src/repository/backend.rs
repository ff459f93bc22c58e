//! Backend trait for notification persistence.
//!
//! The pipeline only needs a small save/update contract from storage, so any
//! store (in-memory, SQL, key-value) can sit behind this trait.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::notification::{ChannelType, DeliveryAttempt, Notification};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Record to update does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Record with the same identity already exists
    #[error("Duplicate record: {0}")]
    Duplicate(String),

    /// Storage is temporarily unavailable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract for notifications and their delivery attempts.
///
/// Calls are made from publisher tasks (`save_notification`) and from
/// consumer workers (attempt bookkeeping).
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Persist a new notification
    async fn save_notification(&self, notification: &Notification) -> Result<(), RepositoryError>;

    /// Look up a notification by ID
    async fn find_notification(&self, id: Uuid) -> Result<Option<Notification>, RepositoryError>;

    /// Persist a new delivery attempt record
    async fn save_delivery_attempt(&self, attempt: &DeliveryAttempt) -> Result<(), RepositoryError>;

    /// Overwrite the existing attempt record for the same (notification, channel)
    async fn update_delivery_attempt(&self, attempt: &DeliveryAttempt)
        -> Result<(), RepositoryError>;

    /// Fetch the attempt record for one channel of a notification
    async fn find_delivery_attempt(
        &self,
        notification_id: Uuid,
        channel: ChannelType,
    ) -> Result<Option<DeliveryAttempt>, RepositoryError>;

    /// All attempt records of a notification
    async fn delivery_attempts(
        &self,
        notification_id: Uuid,
    ) -> Result<Vec<DeliveryAttempt>, RepositoryError>;
}
