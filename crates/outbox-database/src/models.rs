//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outbox event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    New,
    Done,
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::New
    }
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Done => "done",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "done" => Self::Done,
            _ => Self::New,
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted outbox event.
///
/// `reserved_to` is the lease expiry. An event is eligible for dispatch when
/// it is not done and its lease is either absent or already expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub aggregate_id: String,
    pub topic: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub reserved_to: Option<DateTime<Utc>>,
}

impl Event {
    /// Whether the event may be picked up by a poll cycle at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status != EventStatus::Done && self.reserved_to.map_or(true, |lease| lease < now)
    }
}

/// New event for insertion. Identity and status are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEvent {
    pub aggregate_id: String,
    pub topic: String,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// Row counts by dispatch state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    /// New events with no live lease.
    pub new: u64,
    /// New events currently leased.
    pub reserved: u64,
    /// Delivered events.
    pub done: u64,
}
