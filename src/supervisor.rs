//! # Process Supervisor
//!
//! Owns the lifetimes of the lease manager and the scheduler loop. A replica
//! spends its life in one of two states: standby (retrying acquisition on a
//! fixed cadence) or leader (renewal and scheduler tasks running). Losing
//! the lease stops all leader-only work and drops the replica back to
//! standby with a fresh token; a shutdown signal stops everything, joins the
//! tasks, and releases the lease best-effort.
//!
//! - **Version**: 1.1.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.1.0: Standby retry loop instead of exiting when the lease is held
//! - 1.0.0: Initial acquire-then-run composition

use anyhow::Result;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::watch;

use crate::features::leadership::LeaseManager;
use crate::features::reminders::ReminderScheduler;

/// Composes leader election with the leader-only scheduler loop.
pub struct Supervisor {
    lease: Arc<LeaseManager>,
    scheduler: Arc<ReminderScheduler>,
    acquire_retry: StdDuration,
}

impl Supervisor {
    pub fn new(
        lease: Arc<LeaseManager>,
        scheduler: Arc<ReminderScheduler>,
        acquire_retry: StdDuration,
    ) -> Self {
        Supervisor {
            lease,
            scheduler,
            acquire_retry,
        }
    }

    /// Run until the shutdown signal flips.
    ///
    /// Errors surface only when the lease policy fails closed; everything
    /// else (contended lease, lost leadership) is handled by waiting or
    /// re-entering standby.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if !self.acquire_or_wait(&mut shutdown).await? {
                info!("Shutdown requested during standby");
                return Ok(());
            }

            let lost = self.lead(&mut shutdown).await;
            if lost {
                warn!("Leadership lost; leader-only work stopped, re-entering standby");
                continue;
            }

            self.lease.release().await;
            info!("Shutdown complete");
            return Ok(());
        }
    }

    /// Standby: try to acquire, sleeping between attempts. Returns false on
    /// shutdown.
    async fn acquire_or_wait(&self, shutdown: &mut watch::Receiver<bool>) -> Result<bool> {
        loop {
            if *shutdown.borrow() {
                return Ok(false);
            }
            if self.lease.try_acquire().await? {
                return Ok(true);
            }
            info!(
                "Standby: lease held by another replica; retrying in {}s",
                self.acquire_retry.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.acquire_retry) => {}
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Leader epoch: spawn renewal + scheduler, wait for shutdown or
    /// leadership loss, then stop and join both. Returns true when the
    /// epoch ended because leadership was lost.
    async fn lead(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let (stop_tx, stop_rx) = watch::channel(false);

        let renewal = {
            let lease = self.lease.clone();
            let stop = stop_rx.clone();
            tokio::spawn(async move { lease.run_renewal(stop).await })
        };
        let scheduler = {
            let scheduler = self.scheduler.clone();
            tokio::spawn(async move { scheduler.run(stop_rx).await })
        };

        let mut leadership = self.lease.subscribe();
        let lost = loop {
            // The signal may already have flipped before we subscribed
            if !*leadership.borrow_and_update() {
                break true;
            }
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break false;
                    }
                }
                res = leadership.changed() => {
                    if res.is_err() {
                        break true;
                    }
                }
            }
        };

        // Stop both loops and wait for them; a scheduler sweep in flight
        // finishes its deliveries before observing the signal
        let _ = stop_tx.send(true);
        let _ = renewal.await;
        let _ = scheduler.await;
        lost
    }
}
