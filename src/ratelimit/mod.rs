//! Rate limiting module using a sliding-window log.
//!
//! Bounds how many notifications a user receives per channel within a
//! trailing time window. State is in-memory and per process.

mod config;
mod limiter;

pub use config::RateLimitConfig;
pub use limiter::{RateLimitResult, RateLimiter, RateLimiterStats};
