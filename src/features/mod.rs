//! # Features Layer
//!
//! The two halves of the engine: leader election and durable reminder
//! scheduling.

pub mod leadership;
pub mod reminders;

pub use leadership::{
    CoordinationStore, InMemoryCoordinationStore, LeaseManager, LeasePolicy,
    RedisCoordinationStore,
};
pub use reminders::{
    DeliverySink, DeliveryTarget, Reminder, ReminderRepository, ReminderScheduler, ReminderStore,
};
