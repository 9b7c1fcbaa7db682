//! # Leadership Feature
//!
//! Lease-based single-leader election over an atomic key-value store, so the
//! engine can run as redundant replicas without double-firing reminders.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//! - **Toggleable**: false

pub mod lease;
pub mod store;

pub use lease::{LeaseManager, LeasePolicy};
pub use store::{CoordinationStore, InMemoryCoordinationStore, RedisCoordinationStore};
