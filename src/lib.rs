// Core layer - configuration and clock abstraction
pub mod core;

// Features layer - leader election and durable reminder scheduling
pub mod features;

// Application layer - supervised composition of lease + scheduler
pub mod supervisor;

// Re-export core items
pub use crate::core::{Clock, Config, ManualClock, SystemClock};

// Re-export feature items
pub use features::{
    // Leadership
    CoordinationStore, InMemoryCoordinationStore, LeaseManager, LeasePolicy,
    RedisCoordinationStore,
    // Reminders
    DeliverySink, DeliveryTarget, Reminder, ReminderRepository, ReminderScheduler, ReminderStore,
};

// Re-export application items
pub use supervisor::Supervisor;
