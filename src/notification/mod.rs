//! Notification model, delivery handling, and the orchestrator that queues
//! notifications onto the broker.

mod handler;
mod orchestrator;
mod types;

pub use handler::DeliveryHandler;
pub use orchestrator::{NotificationOrchestrator, QueueOutcome};
pub use types::{
    ChannelType, DeliveryAttempt, DeliveryStatus, Notification, NotificationCategory,
    NotificationEvent, NotificationStatus, UserPreference,
};
