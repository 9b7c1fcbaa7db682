//! Coordination store adapters.
//!
//! The lease protocol needs exactly two atomic primitives from its backing
//! store: "create this key with a TTL only if it is absent" and "extend or
//! delete this key only if it still holds my token". Both conditional
//! operations must be a single atomic step on the store side; a separate
//! read followed by a write would race with a competing replica.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

use crate::core::Clock;

/// Atomic key-value operations backing the lease protocol.
///
/// Any store offering create-if-absent-with-TTL and token-conditional
/// extend/delete is sufficient.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Create `key = token` with the given TTL, only if `key` is absent.
    /// Returns true iff the key was created by this call.
    async fn try_acquire(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool>;

    /// Extend the TTL of `key`, only if it still holds `token`.
    /// Returns false when ownership changed (or the key expired).
    async fn renew(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool>;

    /// Delete `key`, only if it still holds `token`. Returns whether a
    /// deletion happened.
    async fn release(&self, key: &str, token: &str) -> Result<bool>;
}

// ============================================================================
// Redis adapter
// ============================================================================

/// Check-then-extend as one atomic step on the server.
const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('EXPIRE', KEYS[1], ARGV[2])
else
    return 0
end"#;

/// Check-then-delete as one atomic step on the server.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end"#;

/// Redis-backed coordination store.
///
/// Acquisition is `SET key token NX EX ttl`; renewal and release run small
/// server-side scripts so the token check and the mutation are indivisible.
pub struct RedisCoordinationStore {
    client: redis::Client,
    renew_script: redis::Script,
    release_script: redis::Script,
}

impl RedisCoordinationStore {
    /// Build a store from a Redis URL (`redis://` or `rediss://`).
    ///
    /// Only the URL is validated here; connections are established lazily per
    /// operation, so an unreachable server surfaces as an operation error.
    pub fn connect(url: &str) -> Result<Self> {
        let client =
            redis::Client::open(url).context("Invalid Redis URL for the coordination store")?;
        Ok(RedisCoordinationStore {
            client,
            renew_script: redis::Script::new(RENEW_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("Could not connect to the coordination store")
    }
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool> {
        let mut conn = self.connection().await?;
        // SET NX EX replies OK on success and Nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .context("Lease acquire command failed")?;
        Ok(reply.is_some())
    }

    async fn renew(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool> {
        let mut conn = self.connection().await?;
        let extended: i64 = self
            .renew_script
            .key(key)
            .arg(token)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .context("Lease renew script failed")?;
        Ok(extended == 1)
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .context("Lease release script failed")?;
        Ok(deleted == 1)
    }
}

// ============================================================================
// In-memory adapter
// ============================================================================

/// In-memory coordination store with clock-driven expiry.
///
/// Used by tests and available for single-node deployments that want lease
/// semantics without an external store. Expiry is evaluated lazily against
/// the injected clock.
pub struct InMemoryCoordinationStore {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<String, LeaseEntry>>,
}

struct LeaseEntry {
    token: String,
    expires_at: DateTime<Utc>,
}

impl InMemoryCoordinationStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        InMemoryCoordinationStore {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn ttl_from(&self, ttl: StdDuration) -> Duration {
        Duration::seconds(ttl.as_secs() as i64)
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn try_acquire(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        if let Some(entry) = leases.get(key) {
            if entry.expires_at > now {
                return Ok(false);
            }
        }
        leases.insert(
            key.to_string(),
            LeaseEntry {
                token: token.to_string(),
                expires_at: now + self.ttl_from(ttl),
            },
        );
        Ok(true)
    }

    async fn renew(&self, key: &str, token: &str, ttl: StdDuration) -> Result<bool> {
        let now = self.clock.now();
        let mut leases = self.leases.lock().await;
        match leases.get_mut(key) {
            Some(entry) if entry.token == token && entry.expires_at > now => {
                entry.expires_at = now + self.ttl_from(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let mut leases = self.leases.lock().await;
        match leases.get(key) {
            Some(entry) if entry.token == token => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ManualClock;
    use chrono::Utc;

    const KEY: &str = "test:leader";
    const TTL: StdDuration = StdDuration::from_secs(30);

    fn store() -> (Arc<ManualClock>, InMemoryCoordinationStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = InMemoryCoordinationStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_second_acquire_loses() {
        let (_clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        assert!(!store.try_acquire(KEY, "token-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_succeeds_after_expiry() {
        let (clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        clock.advance(Duration::seconds(31));
        assert!(store.try_acquire(KEY, "token-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_extends_before_expiry() {
        let (clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        clock.advance(Duration::seconds(26));
        assert!(store.renew(KEY, "token-a", TTL).await.unwrap());

        // The renewal pushed expiry out; 26 more seconds is still inside it
        clock.advance(Duration::seconds(26));
        assert!(!store.try_acquire(KEY, "token-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_fails_for_mismatched_token() {
        let (_clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        assert!(!store.renew(KEY, "token-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_fails_after_expiry() {
        let (clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        clock.advance(Duration::seconds(31));
        assert!(!store.renew(KEY, "token-a", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_with_matching_token() {
        let (_clock, store) = store();

        assert!(store.try_acquire(KEY, "token-a", TTL).await.unwrap());
        assert!(!store.release(KEY, "token-b").await.unwrap());
        assert!(store.release(KEY, "token-a").await.unwrap());

        // Key is gone; a new holder can move in
        assert!(store.try_acquire(KEY, "token-b", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_acquires_single_winner() {
        let (_clock, store) = store();
        let store = Arc::new(store);

        let a = {
            let store = store.clone();
            tokio::spawn(async move { store.try_acquire(KEY, "token-a", TTL).await.unwrap() })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move { store.try_acquire(KEY, "token-b", TTL).await.unwrap() })
        };

        let (won_a, won_b) = (a.await.unwrap(), b.await.unwrap());
        assert!(won_a ^ won_b, "exactly one contender may win the lease");
    }
}
