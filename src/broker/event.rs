use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channels::SendError;
use crate::notification::NotificationEvent;

/// Known payload kinds carried by broker events.
///
/// Handlers match on this exhaustively instead of downcasting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Notification(NotificationEvent),
}

/// Unit of work flowing through the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub payload: EventPayload,
    /// Re-enqueue count, only ever bumped by the owning consumer
    pub retries: u32,
}

impl Event {
    pub fn new(id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            retries: 0,
        }
    }

    pub fn notification(id: impl Into<String>, event: NotificationEvent) -> Self {
        Self::new(id, EventPayload::Notification(event))
    }
}

/// Why a handler could not process an event
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Send failed: {0}")]
    Send(#[from] SendError),

    #[error("Handler error: {0}")]
    Other(String),
}

/// Processes events taken off a consumer's live queue.
///
/// An `Err` hands the event back to the consumer's retry logic.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), DeliveryError>;
}
