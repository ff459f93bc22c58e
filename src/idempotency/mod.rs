//! Request deduplication.
//!
//! Keys are kept for the lifetime of the process and never evicted, so
//! memory grows with the number of distinct requests. Bounding it would
//! need an eviction policy with an explicit dedup window, which changes
//! which requests count as duplicates.

use std::sync::Arc;

use dashmap::DashSet;

use crate::notification::NotificationCategory;

/// First-seen-wins set of idempotency keys.
///
/// Lookups take shard read locks only, so many concurrent duplicate checks
/// proceed in parallel while inserts serialize per shard.
#[derive(Debug, Default, Clone)]
pub struct IdempotencyGuard {
    seen: Arc<DashSet<String>>,
}

impl IdempotencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key derived from the logical identity of a notification request
    pub fn dedup_key(user_id: &str, category: NotificationCategory, title: &str) -> String {
        format!("{}:{}:{}", user_id, category.as_str(), title)
    }

    /// True if `key` has been stored before
    pub fn is_duplicate(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Record `key`. Returns false if it was already present.
    pub fn store(&self, key: impl Into<String>) -> bool {
        self.seen.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
