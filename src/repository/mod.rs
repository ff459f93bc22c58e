//! Notification persistence.
//!
//! The pipeline depends only on the `NotificationRepository` trait.
//! `MemoryRepository` is the bundled implementation.

mod backend;
mod memory_backend;

pub use backend::{NotificationRepository, RepositoryError};
pub use memory_backend::MemoryRepository;
