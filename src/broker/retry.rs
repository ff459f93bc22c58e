//! Retry policy for failed deliveries

use std::time::Duration;

/// Exponential delay between retries: `base * 2^retries`, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffConfig {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay to wait before the retry following `retries` earlier retries
    pub fn delay_for(&self, retries: u32) -> Duration {
        let mut delay = self.base;
        for _ in 0..retries {
            delay = delay.saturating_mul(2);
            if delay >= self.max {
                return self.max;
            }
        }
        delay.min(self.max)
    }
}

/// What a consumer does with an event whose handler failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-enqueue into the live queue, optionally after a delay
    Retry { delay: Option<Duration> },
    /// Retries exhausted
    DeadLetter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retry_limit: u32,
    /// No backoff means immediate re-enqueue
    pub backoff: Option<BackoffConfig>,
}

impl RetryPolicy {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            retry_limit,
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Decide the fate of an event that has already been retried `retries` times
    pub fn next_action(&self, retries: u32) -> RetryAction {
        if retries < self.retry_limit {
            RetryAction::Retry {
                delay: self.backoff.map(|b| b.delay_for(retries)),
            }
        } else {
            RetryAction::DeadLetter
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}
