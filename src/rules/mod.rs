//! Channel routing rules.

use smallvec::SmallVec;

use crate::notification::{ChannelType, Notification, NotificationCategory, UserPreference};

/// Resolved channel list; never more than the four channel types
pub type Channels = SmallVec<[ChannelType; 4]>;

/// Default channels per category, in delivery order
pub fn default_channels(category: NotificationCategory) -> &'static [ChannelType] {
    match category {
        NotificationCategory::Transaction => {
            &[ChannelType::Email, ChannelType::Push, ChannelType::InApp]
        }
        NotificationCategory::Marketing => &[ChannelType::Email, ChannelType::InApp],
        NotificationCategory::Security => &[ChannelType::Email, ChannelType::Sms, ChannelType::Push],
        NotificationCategory::System => &[ChannelType::InApp],
    }
}

/// Maps a notification and the user's preferences to delivery channels
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    /// Category defaults, filtered by the user's enabled channels.
    ///
    /// Missing preferences, or preferences with nothing enabled, keep the
    /// defaults unfiltered.
    pub fn resolve_channels(
        &self,
        notification: &Notification,
        preferences: Option<&UserPreference>,
    ) -> Channels {
        let defaults = default_channels(notification.category);

        match preferences {
            Some(prefs) if !prefs.enabled_channels.is_empty() => defaults
                .iter()
                .copied()
                .filter(|ch| prefs.is_channel_allowed(*ch))
                .collect(),
            _ => defaults.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(category: NotificationCategory) -> Notification {
        Notification::new("user-1", category, "Title", "Content")
    }

    #[test]
    fn test_transaction_defaults() {
        let channels = RuleEngine::new()
            .resolve_channels(&notification(NotificationCategory::Transaction), None);
        assert_eq!(
            channels.as_slice(),
            &[ChannelType::Email, ChannelType::Push, ChannelType::InApp]
        );
    }

    #[test]
    fn test_preferences_filter_defaults() {
        let prefs = UserPreference::new("user-1", vec![ChannelType::Push]);
        let channels = RuleEngine::new()
            .resolve_channels(&notification(NotificationCategory::Transaction), Some(&prefs));
        assert_eq!(channels.as_slice(), &[ChannelType::Push]);
    }

    #[test]
    fn test_empty_preferences_keep_defaults() {
        let prefs = UserPreference::new("user-1", vec![]);
        let channels = RuleEngine::new()
            .resolve_channels(&notification(NotificationCategory::Security), Some(&prefs));
        assert_eq!(
            channels.as_slice(),
            &[ChannelType::Email, ChannelType::Sms, ChannelType::Push]
        );
    }

    #[test]
    fn test_filter_preserves_default_order() {
        // Preference order must not leak into the result
        let prefs = UserPreference::new("user-1", vec![ChannelType::InApp, ChannelType::Email]);
        let channels = RuleEngine::new()
            .resolve_channels(&notification(NotificationCategory::Transaction), Some(&prefs));
        assert_eq!(channels.as_slice(), &[ChannelType::Email, ChannelType::InApp]);
    }

    #[test]
    fn test_no_overlap_yields_nothing() {
        let prefs = UserPreference::new("user-1", vec![ChannelType::Sms]);
        let channels = RuleEngine::new()
            .resolve_channels(&notification(NotificationCategory::Marketing), Some(&prefs));
        assert!(channels.is_empty());
    }

    #[test]
    fn test_every_category_has_defaults() {
        for category in NotificationCategory::ALL {
            assert!(!default_channels(category).is_empty());
        }
    }
}
