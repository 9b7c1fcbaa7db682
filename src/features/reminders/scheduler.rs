//! Reminder scheduler loop.
//!
//! Leader-only polling loop: every tick it pops the reminders due inside the
//! lookahead window and hands them to the delivery sink, outside the
//! repository's critical section. A failed delivery is logged and the item
//! is still consumed: a one-shot reminder whose destination permanently
//! rejects it is accepted as lost rather than redelivered forever, and a
//! repeating one simply gets its next occurrence.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Cooperative stop via watch channel
//! - 1.0.0: Initial poll/deliver loop

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

use crate::core::Clock;
use crate::features::reminders::item::DeliveryTarget;
use crate::features::reminders::repository::ReminderRepository;

/// Delivery port. Implemented by the surrounding application (the gateway
/// client); the engine never learns how a target maps to a real destination.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, target: &DeliveryTarget, owner_id: &str, message: &str) -> Result<()>;
}

/// Periodic due-check loop bound to a repository and a sink.
pub struct ReminderScheduler {
    repository: Arc<ReminderRepository>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    poll_interval: StdDuration,
    poll_window: StdDuration,
}

impl ReminderScheduler {
    pub fn new(
        repository: Arc<ReminderRepository>,
        sink: Arc<dyn DeliverySink>,
        clock: Arc<dyn Clock>,
        poll_interval: StdDuration,
        poll_window: StdDuration,
    ) -> Self {
        ReminderScheduler {
            repository,
            sink,
            clock,
            poll_interval,
            poll_window,
        }
    }

    /// Run until the stop signal flips. Only the leader may call this.
    pub async fn run(&self, mut stop: watch::Receiver<bool>) {
        info!(
            "Reminder scheduler started (poll {}s, window {}s)",
            self.poll_interval.as_secs(),
            self.poll_window.as_secs()
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reminder scheduler stopped");
    }

    /// One poll cycle: drain due reminders, then deliver each independently.
    ///
    /// Delivery failures are isolated per item so one broken destination
    /// cannot block or drop the rest of the batch.
    pub async fn sweep_once(&self) {
        let now = self.clock.now();
        let window = Duration::seconds(self.poll_window.as_secs() as i64);

        let due = match self.repository.pop_due(now, window).await {
            Ok(due) => due,
            Err(e) => {
                error!("Due-reminder sweep failed: {e:#}");
                return;
            }
        };
        if due.is_empty() {
            return;
        }

        info!("Delivering {} due reminder(s)", due.len());
        for reminder in due {
            if let Err(e) = self
                .sink
                .deliver(&reminder.target, &reminder.owner_id, &reminder.message)
                .await
            {
                error!(
                    "Delivery failed for reminder {} (owner {}); dropping after one attempt: {e:#}",
                    reminder.id, reminder.owner_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::features::reminders::store::ReminderStore;
    use anyhow::anyhow;
    use chrono::Utc;
    use tokio::sync::Mutex;

    const OWNER: &str = "1001";

    /// Records deliveries; fails any message containing "poison".
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink {
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DeliverySink for RecordingSink {
        async fn deliver(
            &self,
            _target: &DeliveryTarget,
            _owner_id: &str,
            message: &str,
        ) -> Result<()> {
            if message.contains("poison") {
                return Err(anyhow!("destination rejected the message"));
            }
            self.delivered.lock().await.push(message.to_string());
            Ok(())
        }
    }

    async fn scheduler(
        dir: &tempfile::TempDir,
    ) -> (Arc<ManualClock>, Arc<ReminderRepository>, Arc<RecordingSink>, ReminderScheduler) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = ReminderStore::new(dir.path().join("reminders.json"));
        let repository = Arc::new(ReminderRepository::load(store, clock.clone()).await);
        let sink = Arc::new(RecordingSink::new());
        let scheduler = ReminderScheduler::new(
            repository.clone(),
            sink.clone() as Arc<dyn DeliverySink>,
            clock.clone() as Arc<dyn Clock>,
            StdDuration::from_secs(5),
            StdDuration::from_secs(2),
        );
        (clock, repository, sink, scheduler)
    }

    #[tokio::test]
    async fn test_sweep_delivers_due_items_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, repository, sink, scheduler) = scheduler(&dir).await;
        let now = clock.now();

        repository
            .add(OWNER, DeliveryTarget::Direct, "second", now - Duration::seconds(5), None)
            .await
            .unwrap();
        repository
            .add(OWNER, DeliveryTarget::Direct, "first", now - Duration::seconds(50), None)
            .await
            .unwrap();
        repository
            .add(OWNER, DeliveryTarget::Direct, "future", now + Duration::hours(1), None)
            .await
            .unwrap();

        scheduler.sweep_once().await;

        assert_eq!(*sink.delivered.lock().await, ["first", "second"]);
        assert_eq!(repository.list_for(OWNER).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delivery_does_not_block_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, repository, sink, scheduler) = scheduler(&dir).await;
        let now = clock.now();

        repository
            .add(OWNER, DeliveryTarget::Direct, "poison pill", now - Duration::seconds(30), None)
            .await
            .unwrap();
        repository
            .add(OWNER, DeliveryTarget::Direct, "healthy", now - Duration::seconds(10), None)
            .await
            .unwrap();

        scheduler.sweep_once().await;

        // The healthy item was still delivered, and the failed one was
        // consumed rather than left for endless redelivery
        assert_eq!(*sink.delivered.lock().await, ["healthy"]);
        assert!(repository.list_for(OWNER).await.is_empty());
        scheduler.sweep_once().await;
        assert_eq!(sink.delivered.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_uses_lookahead_window() {
        let dir = tempfile::tempdir().unwrap();
        let (clock, repository, sink, scheduler) = scheduler(&dir).await;
        let now = clock.now();

        // Due between this tick and the next; the window must catch it
        repository
            .add(OWNER, DeliveryTarget::Direct, "between ticks", now + Duration::seconds(1), None)
            .await
            .unwrap();

        scheduler.sweep_once().await;
        assert_eq!(*sink.delivered.lock().await, ["between ticks"]);
    }

    #[tokio::test]
    async fn test_run_stops_on_signal() {
        let dir = tempfile::tempdir().unwrap();
        let (_clock, _repository, _sink, scheduler) = scheduler(&dir).await;
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move { scheduler.run(stop_rx).await });
        stop_tx.send(true).unwrap();

        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("scheduler must stop promptly on signal")
            .unwrap();
    }
}
