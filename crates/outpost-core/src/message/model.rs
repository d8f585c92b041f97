//! Message model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub i64);

impl MessageId {
    /// Create a new message ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stored outbound message.
///
/// `to_address`, `from_address` and `subject` are convenience copies of the
/// common header values; `encoded_message` is the full encoded message ready
/// to be handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Recipient address.
    pub to_address: String,
    /// Sender address.
    pub from_address: String,
    /// Subject line.
    pub subject: String,
    /// Entire encoded message.
    pub encoded_message: Vec<u8>,
    /// When the message was created.
    pub created_at: DateTime<Utc>,
}

/// A message that has not been stored yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    /// Recipient address.
    pub to_address: String,
    /// Sender address. Empty means "use the sending account's default".
    pub from_address: String,
    /// Subject line.
    pub subject: String,
    /// Entire encoded message.
    pub encoded_message: Vec<u8>,
}

impl NewMessage {
    /// Creates a new message to the given recipient.
    #[must_use]
    pub fn new(to: impl Into<String>, encoded_message: impl Into<Vec<u8>>) -> Self {
        Self {
            to_address: to.into(),
            encoded_message: encoded_message.into(),
            ..Self::default()
        }
    }

    /// Sets the sender address.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from_address = from.into();
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_summary_fields() {
        let msg = NewMessage::new("to@example.com", b"raw".to_vec())
            .from("from@example.com")
            .subject("Hello");
        assert_eq!(msg.to_address, "to@example.com");
        assert_eq!(msg.from_address, "from@example.com");
        assert_eq!(msg.subject, "Hello");
        assert_eq!(msg.encoded_message, b"raw");
    }

    #[test]
    fn message_id_display() {
        assert_eq!(MessageId::new(42).to_string(), "42");
    }
}
