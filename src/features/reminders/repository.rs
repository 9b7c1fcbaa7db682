//! Reminder repository.
//!
//! The single point of mutation for the reminder collection. Every operation
//! that reads-modifies-writes the collection runs inside one critical
//! section, and every mutating call performs exactly one save, so the
//! on-disk state always matches a collection that actually existed in
//! memory. Delivery never happens while the lock is held; `pop_due` drains
//! the due items out and the caller delivers them afterwards.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Drift-free catch-up for repeating reminders
//! - 1.0.0: Initial add/list/remove/pop_due over the durable store

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::core::Clock;
use crate::features::reminders::item::{DeliveryTarget, Reminder};
use crate::features::reminders::store::ReminderStore;

/// Owns the reminder collection and its mutual-exclusion discipline.
pub struct ReminderRepository {
    store: ReminderStore,
    clock: Arc<dyn Clock>,
    items: Mutex<Vec<Reminder>>,
}

impl ReminderRepository {
    /// Build a repository over the store's last persisted state.
    pub async fn load(store: ReminderStore, clock: Arc<dyn Clock>) -> Self {
        let items = store.load().await;
        info!("Loaded {} pending reminder(s)", items.len());
        ReminderRepository {
            store,
            clock,
            items: Mutex::new(items),
        }
    }

    /// Create and persist a new reminder.
    ///
    /// Rejects due times more than an hour behind the current instant (a
    /// sign of caller confusion between absolute and local time) and
    /// non-positive repeat intervals.
    pub async fn add(
        &self,
        owner_id: &str,
        target: DeliveryTarget,
        message: &str,
        due_at: DateTime<Utc>,
        repeat_every: Option<Duration>,
    ) -> Result<Reminder> {
        let now = self.clock.now();
        if due_at < now - Duration::hours(1) {
            bail!(
                "Reminder due time {due_at} is in the past (now: {now})"
            );
        }
        if let Some(interval) = repeat_every {
            if interval <= Duration::zero() {
                bail!("Repeat interval must be positive");
            }
        }

        let reminder = Reminder {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            target,
            message: message.to_string(),
            due_at,
            repeat_every,
        };

        let mut items = self.items.lock().await;
        items.push(reminder.clone());
        self.store.save(&items).await?;

        info!(
            "Added reminder {} for owner {} due {}{}",
            reminder.id,
            reminder.owner_id,
            reminder.due_at,
            if reminder.is_repeating() {
                " (repeating)"
            } else {
                ""
            }
        );
        Ok(reminder)
    }

    /// All reminders belonging to an owner, soonest first. Non-destructive.
    pub async fn list_for(&self, owner_id: &str) -> Vec<Reminder> {
        let items = self.items.lock().await;
        let mut mine: Vec<Reminder> = items
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        mine.sort_by_key(|r| r.due_at);
        mine
    }

    /// Remove the owner's reminder with the given id.
    ///
    /// Returns whether a removal occurred; only a real removal persists.
    pub async fn remove(&self, owner_id: &str, id: Uuid) -> Result<bool> {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|r| !(r.id == id && r.owner_id == owner_id));
        if items.len() == before {
            return Ok(false);
        }
        self.store.save(&items).await?;
        info!("Removed reminder {id} for owner {owner_id}");
        Ok(true)
    }

    /// Pop every reminder due at or before `now + lookahead`.
    ///
    /// One-shot reminders are removed from the collection; repeating ones
    /// advance by whole multiples of their interval until strictly beyond
    /// the cutoff, so a replica that was down for several intervals catches
    /// up to the next future occurrence instead of firing a backlog burst.
    /// The returned items keep their original due times, oldest first.
    ///
    /// Runs in one critical section with at most one save; an empty result
    /// does not touch the store.
    pub async fn pop_due(&self, now: DateTime<Utc>, lookahead: Duration) -> Result<Vec<Reminder>> {
        let cutoff = now + lookahead;
        let mut items = self.items.lock().await;

        let current = std::mem::take(&mut *items);
        let mut due = Vec::new();
        let mut kept = Vec::with_capacity(current.len());

        for item in current {
            if item.due_at > cutoff {
                kept.push(item);
                continue;
            }
            due.push(item.clone());
            if let Some(interval) = item.repeat_every {
                let mut next = item;
                while next.due_at <= cutoff {
                    next.due_at = next.due_at + interval;
                }
                kept.push(next);
            }
        }

        *items = kept;
        if due.is_empty() {
            return Ok(due);
        }

        due.sort_by_key(|r| r.due_at);
        self.store.save(&items).await?;
        Ok(due)
    }
}
