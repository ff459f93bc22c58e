//! Sliding-window rate limiter keyed by `user:channel`

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::notification::ChannelType;

use super::config::RateLimitConfig;

/// Smallest usable window; a zero window would prune every admission at once
const MIN_WINDOW: Duration = Duration::from_secs(1);

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed { remaining: u32, limit: u32 },
    /// Request is denied until the oldest admission leaves the window
    Denied { retry_after: Duration, limit: u32 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Per-(user, channel) admission gate.
///
/// Each key keeps the instants of its admissions inside the trailing
/// window. Entries older than the window are pruned lazily on every check.
/// `DashMap` shards the keyspace, so checks for one key are linearized
/// without blocking unrelated keys.
pub struct RateLimiter {
    windows: DashMap<String, VecDeque<Instant>>,
    config: RateLimitConfig,
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        let window = config.window();
        Self::with_window(config, window)
    }

    /// Limiter with `limit` admissions per `window`, kept at full precision
    pub fn with_limit(limit: u32, window: Duration) -> Self {
        let config = RateLimitConfig {
            enabled: true,
            limit,
            window_seconds: window.as_secs(),
            ..Default::default()
        };
        Self::with_window(config, window)
    }

    fn with_window(config: RateLimitConfig, window: Duration) -> Self {
        let window = if window.is_zero() {
            tracing::warn!(
                min_window_ms = MIN_WINDOW.as_millis() as u64,
                "Rate limit window is zero, using the minimum window"
            );
            MIN_WINDOW
        } else {
            window
        };

        Self {
            windows: DashMap::new(),
            config,
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Effective sliding window length
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Key under which a user's channel is counted
    pub fn key(user_id: &str, channel: ChannelType) -> String {
        format!("{}:{}", user_id, channel.as_str())
    }

    /// Admit or refuse one request for `user_id` on `channel`
    pub fn allow(&self, user_id: &str, channel: ChannelType) -> bool {
        self.check(user_id, channel).is_allowed()
    }

    /// Admit or refuse one request, with details
    pub fn check(&self, user_id: &str, channel: ChannelType) -> RateLimitResult {
        self.check_at(&Self::key(user_id, channel), Instant::now())
    }

    /// Admit or refuse one request for `key` as of `now`
    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitResult {
        let limit = self.config.limit;
        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
                limit: 0,
            };
        }

        let window = self.window;
        let mut admitted = self.windows.entry(key.to_string()).or_default();

        // Drop admissions that left the window
        while let Some(&oldest) = admitted.front() {
            if now.saturating_duration_since(oldest) >= window {
                admitted.pop_front();
            } else {
                break;
            }
        }

        let count = admitted.len() as u32;
        if count < limit {
            admitted.push_back(now);
            RateLimitResult::Allowed {
                remaining: limit - count - 1,
                limit,
            }
        } else {
            let retry_after = admitted
                .front()
                .map(|oldest| window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or_default();
            RateLimitResult::Denied { retry_after, limit }
        }
    }

    /// Remove keys with no admission left inside the window
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(Instant::now())
    }

    pub fn cleanup_stale_at(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.windows.len();

        self.windows.retain(|_, admitted| {
            admitted
                .back()
                .map(|newest| now.saturating_duration_since(*newest) < window)
                .unwrap_or(false)
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining_keys = self.windows.len(),
                "Cleaned up stale rate limit windows"
            );
        }

        removed
    }

    /// Get statistics about the rate limiter
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            tracked_keys: self.windows.len(),
            limit: self.config.limit,
            window_ms: self.window.as_millis() as u64,
        }
    }
}

/// Statistics about the rate limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub tracked_keys: usize,
    pub limit: u32,
    pub window_ms: u64,
}
