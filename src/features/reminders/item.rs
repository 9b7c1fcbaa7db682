//! Reminder data model.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a reminder should be delivered.
///
/// Opaque to the engine: only the delivery sink resolves it to a real
/// destination. `Direct` means "straight to the owner" (a DM in the bot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    /// A channel inside a guild.
    Channel { guild_id: u64, channel_id: u64 },
    /// Directly to the owner.
    Direct,
}

/// A single scheduled reminder.
///
/// `due_at` is always an absolute UTC instant; no comparison anywhere in the
/// engine mixes absolute and local time. `repeat_every` is serialized as
/// whole seconds under the `repeat_seconds` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub owner_id: String,
    pub target: DeliveryTarget,
    pub message: String,
    pub due_at: DateTime<Utc>,
    #[serde(
        default,
        rename = "repeat_seconds",
        with = "repeat_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub repeat_every: Option<Duration>,
}

impl Reminder {
    /// Whether normal delivery reschedules this reminder instead of
    /// removing it.
    pub fn is_repeating(&self) -> bool {
        self.repeat_every.is_some()
    }
}

/// Serde adapter: `Option<chrono::Duration>` as whole seconds.
mod repeat_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(interval) => serializer.serialize_some(&interval.num_seconds()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = Option::<i64>::deserialize(deserializer)?;
        Ok(seconds.map(Duration::seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(repeat_every: Option<Duration>) -> Reminder {
        Reminder {
            id: Uuid::new_v4(),
            owner_id: "1001".to_string(),
            target: DeliveryTarget::Channel {
                guild_id: 42,
                channel_id: 7,
            },
            message: "stand-up".to_string(),
            due_at: Utc::now(),
            repeat_every,
        }
    }

    #[test]
    fn test_is_repeating() {
        assert!(!reminder(None).is_repeating());
        assert!(reminder(Some(Duration::minutes(60))).is_repeating());
    }

    #[test]
    fn test_repeat_interval_stored_as_seconds() {
        let json = serde_json::to_value(reminder(Some(Duration::minutes(2)))).unwrap();
        assert_eq!(json["repeat_seconds"], 120);

        let json = serde_json::to_value(reminder(None)).unwrap();
        assert!(json.get("repeat_seconds").is_none());
    }

    #[test]
    fn test_direct_target_round_trips() {
        let original = Reminder {
            target: DeliveryTarget::Direct,
            ..reminder(None)
        };
        let json = serde_json::to_string(&original).unwrap();
        let back: Reminder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, original);
    }
}
