//! Message storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

use super::model::{Message, MessageId, NewMessage};
use crate::Result;
use crate::store::{from_millis, to_millis};

/// Repository for message storage and retrieval.
#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: SqlitePool,
}

impl MessageRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create(&self, message: NewMessage, now: DateTime<Utc>) -> Result<Message> {
        let result = sqlx::query(
            r"
            INSERT INTO messages (to_address, from_address, subject, encoded_message, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(&message.to_address)
        .bind(&message.from_address)
        .bind(&message.subject)
        .bind(&message.encoded_message)
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        Ok(Message {
            id: MessageId::new(result.last_insert_rowid()),
            to_address: message.to_address,
            from_address: message.from_address,
            subject: message.subject,
            encoded_message: message.encoded_message,
            created_at: now,
        })
    }

    /// Get a message by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: MessageId) -> Result<Option<Message>> {
        let row = sqlx::query(
            r"
            SELECT id, to_address, from_address, subject, encoded_message, created_at
            FROM messages
            WHERE id = ?
            ",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_message).transpose()
    }

    /// List messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r"
            SELECT id, to_address, from_address, subject, encoded_message, created_at
            FROM messages
            ORDER BY created_at ASC, id ASC
            LIMIT ? OFFSET ?
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_message).collect()
    }

    /// Total number of stored messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

fn row_to_message(row: &SqliteRow) -> Result<Message> {
    Ok(Message {
        id: MessageId::new(row.try_get("id")?),
        to_address: row.try_get("to_address")?,
        from_address: row.try_get("from_address")?,
        subject: row.try_get("subject")?,
        encoded_message: row.try_get("encoded_message")?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
