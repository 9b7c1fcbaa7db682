//! Engine configuration loaded from the environment.
//!
//! All settings are plain scalars with sane defaults; the engine loads them
//! once at startup and never re-reads them. Floors and clamps keep operator
//! typos from producing a scheduler that spins or a lease that can never be
//! renewed in time.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.1.0: Added LEASE_REQUIRED fail-closed switch and LEASE_RETRY_SECONDS
//! - 1.0.0: Initial env-based configuration

use anyhow::Result;
use std::time::Duration;

use crate::features::leadership::LeasePolicy;

/// Lease TTL floor. Anything shorter than this leaves no room for a renewal
/// cycle before expiry.
const MIN_LEASE_TTL_SECS: u64 = 10;

/// Poll interval floor, matching the dispatcher's minimum cadence.
const MIN_POLL_SECS: u64 = 2;

/// Upper bound for the lookahead window.
const MAX_POLL_WINDOW_SECS: u64 = 10;

/// Runtime configuration for the scheduling engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordination store URL. `None` means no store is configured and the
    /// lease policy decides whether that is acceptable.
    pub redis_url: Option<String>,
    /// Key guarding leader-only work. All replicas must agree on it.
    pub lease_key: String,
    /// Lease time-to-live.
    pub lease_ttl: Duration,
    /// How long a standby replica waits between acquisition attempts.
    pub lease_retry: Duration,
    /// What to do when the coordination store is missing or unreachable.
    pub lease_policy: LeasePolicy,
    /// Scheduler poll period.
    pub poll_interval: Duration,
    /// Forward-looking slack added to "now" on each due check. Always smaller
    /// than `poll_interval`.
    pub poll_window: Duration,
    /// Path of the durable reminder file.
    pub reminder_file: String,
    /// Default log filter for env_logger.
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables, applying defaults,
    /// floors and clamps.
    pub fn from_env() -> Result<Config> {
        let lease_ttl = secs_with_floor(read("LEASE_TTL_SECONDS"), 30, MIN_LEASE_TTL_SECS);
        let poll_interval = secs_with_floor(read("REMINDER_POLL_SECONDS"), 5, MIN_POLL_SECS);
        let poll_window = window_secs(read("REMINDER_POLL_WINDOW"), 2, poll_interval);

        Ok(Config {
            redis_url: read("REDIS_URL").filter(|v| !v.trim().is_empty()),
            lease_key: read("LEADER_LOCK_KEY").unwrap_or_else(|| "vigil:leader".to_string()),
            lease_ttl: Duration::from_secs(lease_ttl),
            lease_retry: Duration::from_secs(secs_with_floor(read("LEASE_RETRY_SECONDS"), 10, 1)),
            lease_policy: if flag(read("LEASE_REQUIRED")) {
                LeasePolicy::RequireLease
            } else {
                LeasePolicy::PreferAvailability
            },
            poll_interval: Duration::from_secs(poll_interval),
            poll_window: Duration::from_secs(poll_window),
            reminder_file: read("REMINDER_FILE").unwrap_or_else(|| "reminders.json".to_string()),
            log_level: read("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn read(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse seconds with a default and a lower bound.
fn secs_with_floor(raw: Option<String>, default: u64, floor: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .max(floor)
}

/// Parse the lookahead window: clamped to 0..=10 and kept strictly below the
/// poll interval so a window can never span more than one tick.
fn window_secs(raw: Option<String>, default: u64, poll_interval: u64) -> u64 {
    let window = raw
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
        .min(MAX_POLL_WINDOW_SECS);
    window.min(poll_interval.saturating_sub(1))
}

fn flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}
