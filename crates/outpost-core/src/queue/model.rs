//! Queue data models.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// Unique identifier for a queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueuedMessageId(pub i64);

impl std::fmt::Display for QueuedMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send priority. Variants are declared in dispatch order, so `High < Normal < Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Sent before everything else.
    High,
    /// Default priority.
    #[default]
    Normal,
    /// Sent when nothing more urgent is ready.
    Low,
}

impl Priority {
    /// Storage rank; lower ranks are dispatched first.
    #[must_use]
    pub const fn rank(self) -> i64 {
        match self {
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }

    /// Inverse of [`Priority::rank`].
    #[must_use]
    pub const fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(Self::High),
            2 => Some(Self::Normal),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Self::High),
            "normal" | "medium" => Ok(Self::Normal),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority '{other}' (expected high, normal or low)")),
        }
    }
}

/// A pending send referencing exactly one stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// Unique identifier.
    pub id: QueuedMessageId,
    /// The message to send.
    pub message_id: MessageId,
    /// Send priority.
    pub priority: Priority,
    /// Not eligible before this time. `None` means eligible now.
    pub deferred_until: Option<DateTime<Utc>>,
    /// Failed delivery attempts so far.
    pub retries: u32,
    /// When the message was queued.
    pub queued_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Returns true if the entry may be dispatched at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.deferred_until.is_none_or(|until| until <= now)
    }

    /// Dispatch order: priority, then `queued_at`, then id.
    #[must_use]
    pub fn dispatch_order(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| self.queued_at.cmp(&other.queued_at))
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Queue size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// All entries.
    pub total: u64,
    /// Entries eligible now.
    pub ready: u64,
    /// Entries deferred or leased into the future.
    pub deferred: u64,
}
