// Core pipeline
pub mod broker;
pub mod notification;
pub mod pipeline;

// Policies applied before publishing
pub mod idempotency;
pub mod ratelimit;
pub mod rules;

// Ports to the outside world
pub mod channels;
pub mod repository;

// Supporting modules
pub mod config;
pub mod error;
pub mod metrics;
pub mod shutdown;
pub mod tasks;
pub mod telemetry;

pub use error::{Error, Result};
