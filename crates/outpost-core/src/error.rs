//! Error types for the core library.

use thiserror::Error;

use crate::account::{AccountId, ValidationError};
use crate::message::MessageId;

/// Errors that can occur in core operations.
///
/// Expected dispatch outcomes (skip, capacity wait, retry, abandon) are not
/// errors; they are reported through [`crate::dispatch::Outcome`].
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed. The store is unavailable and the current
    /// operation must be aborted.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message already has a pending queue entry.
    #[error("Message {0} is already queued")]
    DuplicateEntry(MessageId),

    /// An account with the same host user already exists.
    #[error("Account already exists for host user: {0}")]
    DuplicateAccount(String),

    /// Message not found.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Account failed validation.
    #[error("Invalid account: {}", format_validation(.0))]
    Invalid(Vec<ValidationError>),

    /// A stored timestamp could not be decoded.
    #[error("Invalid stored timestamp: {0}")]
    InvalidTimestamp(i64),

    /// A stored row holds a value its column does not allow.
    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow {
        /// Table the row was read from.
        table: &'static str,
        /// What could not be decoded.
        detail: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if the error means persistent storage is unavailable or
    /// cannot be trusted.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::InvalidTimestamp(_) | Self::CorruptRow { .. }
        )
    }

    /// Returns true if the underlying database error is a unique constraint violation.
    pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
    }

    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        Self::CorruptRow {
            table,
            detail: detail.into(),
        }
    }
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ValidationError::message)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
