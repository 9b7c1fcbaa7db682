//! # Reminders Feature
//!
//! Durable due-time scheduling: persistent reminder storage, a single-writer
//! repository, and the polling loop that delivers due items.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

pub mod item;
pub mod repository;
pub mod scheduler;
pub mod store;

pub use item::{DeliveryTarget, Reminder};
pub use repository::ReminderRepository;
pub use scheduler::{DeliverySink, ReminderScheduler};
pub use store::ReminderStore;
