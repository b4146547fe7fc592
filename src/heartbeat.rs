//! Heartbeat events and the pulse-time merge rule applied by event stores.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Application tag attached to every AFK event.
pub const APP_TAG: &str = "afk";
/// Title attached to every AFK event.
pub const IDLE_TITLE: &str = "Idle time";
/// Event type of the bucket the watcher writes to.
pub const EVENT_TYPE: &str = "afkstatus";

/// Presence status carried by a heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "not-afk")]
    Active,
    #[serde(rename = "afk")]
    Idle,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Active => f.write_str("not-afk"),
            Status::Idle => f.write_str("afk"),
        }
    }
}

/// Payload of an AFK event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    pub status: Status,
    pub app: String,
    pub title: String,
}

/// A timestamped status event. Serializes to the ActivityWatch event shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    /// Length of the span in seconds.
    #[serde(default)]
    pub duration: f64,
    pub data: EventData,
}

impl Heartbeat {
    /// Zero-duration heartbeat for `status` at `timestamp`.
    pub fn new(status: Status, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            duration: 0.0,
            data: EventData {
                status,
                app: APP_TAG.to_string(),
                title: IDLE_TITLE.to_string(),
            },
        }
    }

    pub fn status(&self) -> Status {
        self.data.status
    }

    /// End of the span covered by this event.
    pub fn end(&self) -> DateTime<Utc> {
        self.timestamp
            .checked_add_signed(seconds(self.duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Merge `next` into `self` if both carry the same data and `next` starts
    /// no later than `pulsetime` seconds after `self` ends.
    ///
    /// Returns the extended event, or `None` when `next` must be stored as a
    /// new event.
    pub fn merge(&self, next: &Heartbeat, pulsetime: f64) -> Option<Heartbeat> {
        if self.data != next.data || next.timestamp < self.timestamp {
            return None;
        }
        // a window reaching past the last representable instant covers everything
        if let Some(limit) = self.end().checked_add_signed(seconds(pulsetime)) {
            if next.timestamp > limit {
                return None;
            }
        }

        let end = self.end().max(next.end());
        let span = (end - self.timestamp)
            .num_microseconds()
            .map(|us| us as f64 / 1_000_000.0)
            .unwrap_or(self.duration);

        Some(Heartbeat {
            timestamp: self.timestamp,
            duration: span,
            data: self.data.clone(),
        })
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::microseconds((secs * 1_000_000.0).round() as i64)
}
