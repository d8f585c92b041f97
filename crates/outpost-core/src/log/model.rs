//! Log data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::MessageId;

/// Unique identifier for a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogEntryId(pub i64);

/// Outcome of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultCode {
    /// Delivered by the transport.
    Sent,
    /// Not sent because the recipient is blacklisted.
    Skipped,
    /// Delivery attempt failed; the message will be retried.
    Failed,
    /// Delivery failed and the retry budget is exhausted.
    Abandoned,
}

impl ResultCode {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        }
    }

    /// Human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Sent => "success",
            Self::Skipped => "not sent (blacklisted)",
            Self::Failed => "failure",
            Self::Abandoned => "failure (gave up)",
        }
    }

    /// Returns true if the message left the queue with this outcome.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded attempt outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unique identifier.
    pub id: LogEntryId,
    /// The message the attempt was for.
    pub message_id: MessageId,
    /// Outcome.
    pub result: ResultCode,
    /// When the outcome was recorded.
    pub created_at: DateTime<Utc>,
    /// Free-text detail, e.g. the transport's failure message.
    pub detail: String,
}
