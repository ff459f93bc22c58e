//! Channel senders.
//!
//! The pipeline talks to email/SMS/push/in-app transports only through
//! `ChannelSender`. Concrete transports live outside this crate; the bundled
//! `SimulatedSender` fails at a configurable rate and is what the simulation
//! binary and tests use.

mod simulated;

use async_trait::async_trait;
use thiserror::Error;

use crate::notification::{ChannelType, Notification};

pub use simulated::SimulatedSender;

/// Failure reported by a channel transport.
///
/// A failed send must leave no partial external state behind.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("[{channel}] transient failure: {reason}")]
    Transient { channel: ChannelType, reason: String },

    #[error("[{channel}] unavailable: {reason}")]
    Unavailable { channel: ChannelType, reason: String },
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Channel this sender delivers to
    fn channel(&self) -> ChannelType;

    /// Deliver one notification
    async fn send(&self, notification: &Notification) -> Result<(), SendError>;

    /// Check the transport is reachable
    async fn health_check(&self) -> Result<(), SendError>;
}
