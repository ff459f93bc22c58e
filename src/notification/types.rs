use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery channel a notification can be routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Sms,
    Push,
    InApp,
}

impl ChannelType {
    /// Every channel, in declaration order
    pub const ALL: [ChannelType; 4] = [
        ChannelType::Email,
        ChannelType::Sms,
        ChannelType::Push,
        ChannelType::InApp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "email",
            ChannelType::Sms => "sms",
            ChannelType::Push => "push",
            ChannelType::InApp => "inapp",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(ChannelType::Email),
            "sms" => Ok(ChannelType::Sms),
            "push" => Ok(ChannelType::Push),
            "inapp" => Ok(ChannelType::InApp),
            other => Err(format!("unknown channel type: {}", other)),
        }
    }
}

/// Business category of a notification, drives default channel selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Transaction,
    Marketing,
    Security,
    System,
}

impl NotificationCategory {
    pub const ALL: [NotificationCategory; 4] = [
        NotificationCategory::Transaction,
        NotificationCategory::Marketing,
        NotificationCategory::Security,
        NotificationCategory::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCategory::Transaction => "transaction",
            NotificationCategory::Marketing => "marketing",
            NotificationCategory::Security => "security",
            NotificationCategory::System => "system",
        }
    }
}

impl fmt::Display for NotificationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    #[default]
    Created,
    Queued,
    Processing,
    Sent,
    Failed,
    Delivered,
    Read,
}

/// Status of the delivery attempt record for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// A notification addressed to a single user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub category: NotificationCategory,
    pub title: String,
    pub content: String,
    pub status: NotificationStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    /// Create a notification in the `Created` state with default priority
    pub fn new(
        user_id: impl Into<String>,
        category: NotificationCategory,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            category,
            title: title.into(),
            content: content.into(),
            status: NotificationStatus::Created,
            priority: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status and bump `updated_at`
    pub fn update_status(&mut self, status: NotificationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// The single attempt record kept per (notification, channel)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub notification_id: Uuid,
    pub channel: ChannelType,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub status: DeliveryStatus,
}

impl DeliveryAttempt {
    pub fn new(notification_id: Uuid, channel: ChannelType) -> Self {
        Self {
            notification_id,
            channel,
            attempt_count: 0,
            last_attempt_at: None,
            status: DeliveryStatus::Pending,
        }
    }

    /// Count one more try
    pub fn increment_attempt(&mut self) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(Utc::now());
    }
}

/// Channels a user has opted into
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserPreference {
    pub user_id: String,
    pub enabled_channels: Vec<ChannelType>,
    /// Hour of day (0-23) quiet hours begin; 0 with `quiet_hours_end` 0 means unset
    #[serde(default)]
    pub quiet_hours_start: u8,
    #[serde(default)]
    pub quiet_hours_end: u8,
}

impl UserPreference {
    pub fn new(user_id: impl Into<String>, enabled_channels: Vec<ChannelType>) -> Self {
        Self {
            user_id: user_id.into(),
            enabled_channels,
            quiet_hours_start: 0,
            quiet_hours_end: 0,
        }
    }

    pub fn is_channel_allowed(&self, channel: ChannelType) -> bool {
        self.enabled_channels.contains(&channel)
    }
}

/// Snapshot of a notification routed to specific channels.
///
/// Owns its own copy of the notification, so mutating the source after
/// publishing never leaks into queued events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub notification: Notification,
    pub channels: Vec<ChannelType>,
}

impl NotificationEvent {
    pub fn new(notification: &Notification, channels: Vec<ChannelType>) -> Self {
        Self {
            notification: notification.clone(),
            channels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_round_trips_through_str() {
        for channel in ChannelType::ALL {
            assert_eq!(channel.as_str().parse::<ChannelType>(), Ok(channel));
        }
        assert!("fax".parse::<ChannelType>().is_err());
    }

    #[test]
    fn test_channel_serializes_lowercase() {
        let json = serde_json::to_string(&ChannelType::InApp).unwrap();
        assert_eq!(json, "\"inapp\"");
    }

    #[test]
    fn test_new_notification_defaults() {
        let n = Notification::new("user-1", NotificationCategory::System, "Hi", "Body");
        assert_eq!(n.status, NotificationStatus::Created);
        assert_eq!(n.priority, 1);
        assert_eq!(n.created_at, n.updated_at);
    }

    #[test]
    fn test_update_status_bumps_timestamp() {
        let mut n = Notification::new("user-1", NotificationCategory::System, "Hi", "Body");
        let before = n.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        n.update_status(NotificationStatus::Queued);
        assert_eq!(n.status, NotificationStatus::Queued);
        assert!(n.updated_at > before);
    }

    #[test]
    fn test_attempt_increment() {
        let mut attempt = DeliveryAttempt::new(Uuid::new_v4(), ChannelType::Sms);
        assert_eq!(attempt.attempt_count, 0);
        assert!(attempt.last_attempt_at.is_none());

        attempt.increment_attempt();
        attempt.increment_attempt();
        assert_eq!(attempt.attempt_count, 2);
        assert!(attempt.last_attempt_at.is_some());
        assert_eq!(attempt.status, DeliveryStatus::Pending);
    }

    #[test]
    fn test_event_is_a_snapshot() {
        let mut n = Notification::new("user-1", NotificationCategory::Marketing, "Sale", "50% off");
        let event = NotificationEvent::new(&n, vec![ChannelType::Email]);

        n.title = "Changed".to_string();
        n.update_status(NotificationStatus::Failed);

        assert_eq!(event.notification.title, "Sale");
        assert_eq!(event.notification.status, NotificationStatus::Created);
    }

    #[test]
    fn test_preference_channel_check() {
        let prefs = UserPreference::new("user-1", vec![ChannelType::Push]);
        assert!(prefs.is_channel_allowed(ChannelType::Push));
        assert!(!prefs.is_channel_allowed(ChannelType::Email));
    }
}
