//! Lease-based leader election.
//!
//! At most one replica may run leader-only work at any instant. The claim is
//! a TTL-bounded key in the coordination store holding a random per-process
//! token; it is renewed on a cadence that keeps a healthy leader's lease from
//! expiring under normal jitter, and a renewal rejected because the token no
//! longer matches is fatal to leadership, never best-effort continued.
//!
//! - **Version**: 1.2.0
//! - **Since**: 1.0.0
//!
//! ## Changelog
//! - 1.2.0: Renewal errors now retry on a short cadence up to the TTL boundary
//! - 1.1.0: Configurable degrade-or-fail policy for missing stores
//! - 1.0.0: Initial acquire/renew/release protocol

use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::features::leadership::store::CoordinationStore;

/// Renewal happens this far ahead of expiry.
const RENEWAL_MARGIN: StdDuration = StdDuration::from_secs(5);

/// Renewal cadence never drops below this.
const RENEWAL_FLOOR: StdDuration = StdDuration::from_secs(5);

/// What to do when the coordination store is unconfigured or unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeasePolicy {
    /// Proceed as leader without a lease, with a warning. Losing the store
    /// should not mean the bot may never run; this assumes a degraded
    /// single-instance deployment.
    PreferAvailability,
    /// Refuse to lead without a verifiable lease.
    RequireLease,
}

/// Outcome of a single renewal attempt.
enum RenewOutcome {
    /// Expiry pushed out; we are still the holder.
    Renewed,
    /// The store no longer holds our token. Leadership is gone.
    Lost,
    /// The store could not be reached; worth retrying before the TTL runs out.
    Transient(anyhow::Error),
    /// Running without a lease (degraded or released); nothing to renew.
    Unguarded,
}

/// Guards leader-only work with a renewable exclusive lease.
///
/// A fresh random token is minted for every acquisition attempt, so a replica
/// that lost its lease can never confuse a later holder's record with its own.
pub struct LeaseManager {
    store: Option<Arc<dyn CoordinationStore>>,
    policy: LeasePolicy,
    key: String,
    ttl: StdDuration,
    token: Mutex<String>,
    /// True while an actual store-backed lease is held (false in degraded mode).
    guarded: AtomicBool,
    leader_tx: watch::Sender<bool>,
}

impl LeaseManager {
    pub fn new(
        store: Option<Arc<dyn CoordinationStore>>,
        policy: LeasePolicy,
        key: impl Into<String>,
        ttl: StdDuration,
    ) -> Self {
        let (leader_tx, _) = watch::channel(false);
        LeaseManager {
            store,
            policy,
            key: key.into(),
            ttl,
            token: Mutex::new(String::new()),
            guarded: AtomicBool::new(false),
            leader_tx,
        }
    }

    /// Whether this process currently believes it is the leader.
    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Watch leadership transitions. The value flips to false exactly once
    /// per held lease, when leadership is lost or released.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// Attempt to become leader with a fresh token.
    ///
    /// Returns false when another replica holds the lease. Store errors and
    /// an unconfigured store follow the configured [`LeasePolicy`].
    pub async fn try_acquire(&self) -> Result<bool> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => {
                return match self.policy {
                    LeasePolicy::PreferAvailability => {
                        warn!(
                            "No coordination store configured; assuming leadership WITHOUT a lease"
                        );
                        self.guarded.store(false, Ordering::SeqCst);
                        self.leader_tx.send_replace(true);
                        Ok(true)
                    }
                    LeasePolicy::RequireLease => {
                        bail!("No coordination store configured and a lease is required")
                    }
                };
            }
        };

        let token = Uuid::new_v4().to_string();
        match store.try_acquire(&self.key, &token, self.ttl).await {
            Ok(true) => {
                info!(
                    "Acquired lease '{}' (ttl {}s)",
                    self.key,
                    self.ttl.as_secs()
                );
                *self.token.lock().await = token;
                self.guarded.store(true, Ordering::SeqCst);
                self.leader_tx.send_replace(true);
                Ok(true)
            }
            Ok(false) => {
                debug!("Lease '{}' is held by another replica", self.key);
                Ok(false)
            }
            Err(e) => match self.policy {
                LeasePolicy::PreferAvailability => {
                    warn!(
                        "Coordination store unreachable ({e:#}); assuming leadership WITHOUT a lease"
                    );
                    self.guarded.store(false, Ordering::SeqCst);
                    self.leader_tx.send_replace(true);
                    Ok(true)
                }
                LeasePolicy::RequireLease => {
                    Err(e).context("Lease acquisition failed and a lease is required")
                }
            },
        }
    }

    /// Keep the lease alive until stopped or until leadership is lost.
    ///
    /// Wakes every `max(ttl - 5s, 5s)`. A rejected renewal flips the
    /// leadership watch to false and ends the loop; transient store errors
    /// retry on a short cadence, but only until the TTL boundary; past it
    /// the lease must be presumed expired and taken by someone else.
    pub async fn run_renewal(&self, mut stop: watch::Receiver<bool>) {
        if !self.guarded.load(Ordering::SeqCst) {
            // Degraded mode has no lease to maintain.
            return;
        }

        let interval = self.renewal_interval();
        let mut wait = interval;
        let mut last_success = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                res = stop.changed() => {
                    if res.is_err() || *stop.borrow() {
                        return;
                    }
                    continue;
                }
            }

            match self.renew_once().await {
                RenewOutcome::Renewed => {
                    last_success = tokio::time::Instant::now();
                    wait = interval;
                }
                RenewOutcome::Lost | RenewOutcome::Unguarded => return,
                RenewOutcome::Transient(e) => {
                    if last_success.elapsed() >= self.ttl {
                        error!(
                            "Lease '{}' could not be renewed before expiry ({e:#}); giving up leadership",
                            self.key
                        );
                        self.guarded.store(false, Ordering::SeqCst);
                        self.leader_tx.send_replace(false);
                        return;
                    }
                    warn!("Lease '{}' renewal error (will retry): {e:#}", self.key);
                    wait = RENEWAL_FLOOR;
                }
            }
        }
    }

    /// One conditional check-then-extend round trip.
    async fn renew_once(&self) -> RenewOutcome {
        if !self.guarded.load(Ordering::SeqCst) {
            return RenewOutcome::Unguarded;
        }
        let store = match &self.store {
            Some(store) => store.clone(),
            None => return RenewOutcome::Unguarded,
        };
        let token = self.token.lock().await.clone();

        match store.renew(&self.key, &token, self.ttl).await {
            Ok(true) => {
                debug!("Lease '{}' renewed", self.key);
                RenewOutcome::Renewed
            }
            Ok(false) => {
                error!(
                    "Lost lease '{}' (renewal rejected, another replica owns it); giving up leadership",
                    self.key
                );
                self.guarded.store(false, Ordering::SeqCst);
                self.leader_tx.send_replace(false);
                RenewOutcome::Lost
            }
            Err(e) => RenewOutcome::Transient(e),
        }
    }

    /// Best-effort conditional release on graceful shutdown.
    ///
    /// Never deletes a lease this process no longer owns: the token check
    /// happens atomically on the store, so a stale shutdown cannot destroy a
    /// new legitimate leader's record.
    pub async fn release(&self) {
        if self.guarded.swap(false, Ordering::SeqCst) {
            if let Some(store) = &self.store {
                let token = self.token.lock().await.clone();
                match store.release(&self.key, &token).await {
                    Ok(true) => info!("Released lease '{}'", self.key),
                    Ok(false) => debug!("Lease '{}' was no longer ours to release", self.key),
                    Err(e) => warn!(
                        "Lease '{}' release failed (expiry will reclaim it): {e:#}",
                        self.key
                    ),
                }
            }
        }
        self.leader_tx.send_replace(false);
    }

    fn renewal_interval(&self) -> StdDuration {
        self.ttl
            .checked_sub(RENEWAL_MARGIN)
            .unwrap_or_default()
            .max(RENEWAL_FLOOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use crate::features::leadership::store::InMemoryCoordinationStore;
    use chrono::{Duration, Utc};

    const KEY: &str = "test:leader";
    const TTL: StdDuration = StdDuration::from_secs(30);

    fn harness() -> (Arc<ManualClock>, Arc<InMemoryCoordinationStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        (clock, store)
    }

    fn manager(store: Arc<InMemoryCoordinationStore>, policy: LeasePolicy) -> LeaseManager {
        LeaseManager::new(Some(store as Arc<dyn CoordinationStore>), policy, KEY, TTL)
    }

    #[tokio::test]
    async fn test_two_managers_one_leader() {
        let (_clock, store) = harness();
        let a = manager(store.clone(), LeasePolicy::RequireLease);
        let b = manager(store, LeasePolicy::RequireLease);

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let (clock, store) = harness();
        let a = manager(store.clone(), LeasePolicy::RequireLease);
        let b = manager(store, LeasePolicy::RequireLease);

        assert!(a.try_acquire().await.unwrap());

        // Healthy renewal inside the TTL
        clock.advance(Duration::seconds(26));
        assert!(matches!(a.renew_once().await, RenewOutcome::Renewed));

        // No renewal for a full TTL: the record expires and B moves in
        clock.advance(Duration::seconds(31));
        assert!(b.try_acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_rejected_renewal_reports_leadership_loss() {
        let (clock, store) = harness();
        let a = manager(store.clone(), LeasePolicy::RequireLease);
        let b = manager(store, LeasePolicy::RequireLease);

        assert!(a.try_acquire().await.unwrap());
        let mut leadership = a.subscribe();

        // A's record expires and B takes the key with its own token
        clock.advance(Duration::seconds(31));
        assert!(b.try_acquire().await.unwrap());

        // A's conditional renewal must fail and flip the leadership signal
        assert!(matches!(a.renew_once().await, RenewOutcome::Lost));
        assert!(!a.is_leader());
        assert!(!*leadership.borrow_and_update());

        // B is unaffected
        assert!(matches!(b.renew_once().await, RenewOutcome::Renewed));
    }

    #[tokio::test]
    async fn test_release_is_conditional_on_ownership() {
        let (clock, store) = harness();
        let a = manager(store.clone(), LeasePolicy::RequireLease);
        let b = manager(store.clone(), LeasePolicy::RequireLease);

        assert!(a.try_acquire().await.unwrap());
        clock.advance(Duration::seconds(31));
        assert!(b.try_acquire().await.unwrap());

        // A lost the lease; its release must not destroy B's record
        a.release().await;
        assert!(matches!(b.renew_once().await, RenewOutcome::Renewed));
    }

    #[tokio::test]
    async fn test_reacquire_after_loss_uses_fresh_token() {
        let (clock, store) = harness();
        let a = manager(store.clone(), LeasePolicy::RequireLease);
        let b = manager(store, LeasePolicy::RequireLease);

        assert!(a.try_acquire().await.unwrap());
        clock.advance(Duration::seconds(31));
        assert!(b.try_acquire().await.unwrap());
        assert!(matches!(a.renew_once().await, RenewOutcome::Lost));

        // B releases; A can come back with a new token
        b.release().await;
        assert!(a.try_acquire().await.unwrap());
        assert!(matches!(a.renew_once().await, RenewOutcome::Renewed));
    }

    #[tokio::test]
    async fn test_missing_store_degrades_by_default() {
        let manager = LeaseManager::new(None, LeasePolicy::PreferAvailability, KEY, TTL);
        assert!(manager.try_acquire().await.unwrap());
        assert!(manager.is_leader());
    }

    #[tokio::test]
    async fn test_missing_store_fails_closed_when_required() {
        let manager = LeaseManager::new(None, LeasePolicy::RequireLease, KEY, TTL);
        assert!(manager.try_acquire().await.is_err());
        assert!(!manager.is_leader());
    }

    #[tokio::test]
    async fn test_renewal_interval_keeps_margin_and_floor() {
        let (_clock, store) = harness();

        let long = LeaseManager::new(
            Some(store.clone() as Arc<dyn CoordinationStore>),
            LeasePolicy::RequireLease,
            KEY,
            StdDuration::from_secs(30),
        );
        assert_eq!(long.renewal_interval(), StdDuration::from_secs(25));

        let short = LeaseManager::new(
            Some(store as Arc<dyn CoordinationStore>),
            LeasePolicy::RequireLease,
            KEY,
            StdDuration::from_secs(8),
        );
        assert_eq!(short.renewal_interval(), StdDuration::from_secs(5));
    }
}
