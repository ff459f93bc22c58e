use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ratelimit::RateLimiter;

/// Background task that drops rate limiter windows with no recent admission
pub struct RateLimitCleanupTask {
    rate_limiter: Arc<RateLimiter>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl RateLimitCleanupTask {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            rate_limiter,
            interval: interval.max(Duration::from_millis(1)),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut cleanup_timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        cleanup_timer.tick().await;

        tracing::info!(
            cleanup_interval_ms = self.interval.as_millis() as u64,
            window_ms = self.rate_limiter.window().as_millis() as u64,
            "Rate limit cleanup task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Rate limit cleanup task received shutdown signal");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    let removed = self.rate_limiter.cleanup_stale();
                    if removed > 0 {
                        tracing::info!(
                            removed = removed,
                            tracked_keys = self.rate_limiter.stats().tracked_keys,
                            "Cleaned up stale rate limit keys"
                        );
                    }
                }
            }
        }

        tracing::info!("Rate limit cleanup task stopped");
    }
}
