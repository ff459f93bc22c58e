use std::collections::HashMap;
use std::env;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::broker::{BackoffConfig, ConsumerConfig, RetryPolicy};
use crate::ratelimit::RateLimitConfig;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Live queue capacity per consumer
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Dead-letter queue capacity per consumer
    #[serde(default = "default_queue_capacity")]
    pub dlq_capacity: usize,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    /// Base retry delay in milliseconds (0 = retry immediately)
    #[serde(default)]
    pub backoff_base_ms: u64,
    /// Upper bound of the retry delay in milliseconds
    #[serde(default)]
    pub backoff_max_ms: u64,
    /// Per-topic overrides, keyed by topic name
    #[serde(default)]
    pub topics: HashMap<String, TopicOverride>,
}

/// Settings that replace the pipeline-wide values for one topic
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicOverride {
    pub queue_capacity: Option<usize>,
    pub dlq_capacity: Option<usize>,
    pub worker_count: Option<usize>,
    pub retry_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    /// Seconds to wait for queues to drain before signalling workers
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
    /// Seconds to wait for workers to exit after the signal
    #[serde(default = "default_join_timeout")]
    pub join_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_users")]
    pub users: usize,
    #[serde(default = "default_notifications")]
    pub notifications: usize,
    /// Concurrent publisher tasks
    #[serde(default = "default_publishers")]
    pub publishers: usize,
    /// Probability that a simulated send fails
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_queue_capacity() -> usize {
    50_000
}

fn default_worker_count() -> usize {
    50
}

fn default_retry_limit() -> u32 {
    3
}

fn default_drain_timeout() -> u64 {
    30
}

fn default_join_timeout() -> u64 {
    10
}

fn default_users() -> usize {
    10_000
}

fn default_notifications() -> usize {
    10_000
}

fn default_publishers() -> usize {
    100
}

fn default_failure_rate() -> f64 {
    0.1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // FANOUT__PIPELINE__WORKER_COUNT, FANOUT__RATE_LIMIT__LIMIT, etc.
            .add_source(
                Environment::with_prefix("FANOUT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self, retry_limit: u32) -> RetryPolicy {
        let policy = RetryPolicy::new(retry_limit);
        if self.backoff_base_ms == 0 {
            return policy;
        }
        let base = Duration::from_millis(self.backoff_base_ms);
        let max = Duration::from_millis(self.backoff_max_ms).max(base);
        policy.with_backoff(BackoffConfig::new(base, max))
    }

    /// Consumer settings for `topic`, with its overrides applied
    pub fn consumer_config(&self, topic: &str) -> ConsumerConfig {
        let overrides = self.topics.get(topic).cloned().unwrap_or_default();
        ConsumerConfig {
            queue_capacity: overrides.queue_capacity.unwrap_or(self.queue_capacity),
            dlq_capacity: overrides.dlq_capacity.unwrap_or(self.dlq_capacity),
            worker_count: overrides.worker_count.unwrap_or(self.worker_count),
            retry: self.retry_policy(overrides.retry_limit.unwrap_or(self.retry_limit)),
        }
    }
}

impl ShutdownSettings {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_seconds)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            dlq_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            retry_limit: default_retry_limit(),
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            topics: HashMap::new(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: default_drain_timeout(),
            join_timeout_seconds: default_join_timeout(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            users: default_users(),
            notifications: default_notifications(),
            publishers: default_publishers(),
            failure_rate: default_failure_rate(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}
