//! Rate limiting configuration

use std::time::Duration;

use serde::Deserialize;

/// Configuration for per-user, per-channel rate limiting
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Whether rate limiting is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum admissions per key within one window
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Sliding window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Interval of the stale-key cleanup task in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_limit() -> u32 {
    1000 // per user and channel
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    60
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            limit: default_limit(),
            window_seconds: default_window_seconds(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}
