//! Queue storage repository.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{Priority, QueueStats, QueuedMessage, QueuedMessageId};
use crate::log::{ResultCode, insert_entry};
use crate::message::MessageId;
use crate::store::{after, from_millis, to_millis};
use crate::{Error, Result};

const COLUMNS: &str = "id, message_id, priority, deferred_until, retries, queued_at";

/// Repository for the pending-send queue.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: SqlitePool,
}

impl QueueRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queue a stored message for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEntry`] if the message already has a pending
    /// entry (nothing is changed), or an error if the database query fails.
    pub async fn enqueue(
        &self,
        message_id: MessageId,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<QueuedMessageId> {
        let result = sqlx::query(
            r"
            INSERT INTO queued_messages (message_id, priority, deferred_until, retries, queued_at)
            VALUES (?, ?, NULL, 0, ?)
            ",
        )
        .bind(message_id.0)
        .bind(priority.rank())
        .bind(to_millis(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if Error::is_unique_violation(&e) {
                Error::DuplicateEntry(message_id)
            } else {
                Error::Database(e)
            }
        })?;

        let id = QueuedMessageId(result.last_insert_rowid());
        debug!(%id, %message_id, %priority, "Queued message");
        Ok(id)
    }

    /// The entry that would be dispatched next at `now`, without claiming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn next_ready(&self, now: DateTime<Utc>) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {COLUMNS}
            FROM queued_messages
            WHERE deferred_until IS NULL OR deferred_until <= ?
            ORDER BY priority ASC, queued_at ASC, id ASC
            LIMIT 1
            "
        ))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    /// Atomically lease the next eligible entry.
    ///
    /// Selection and lease happen in a single statement, so two passes racing
    /// for the same entry cannot both get it. The returned entry's
    /// `deferred_until` is the lease expiry; other passes skip it until the
    /// lease is resolved or expires.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn claim(
        &self,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            r"
            UPDATE queued_messages
            SET deferred_until = ?
            WHERE id = (
                SELECT id
                FROM queued_messages
                WHERE deferred_until IS NULL OR deferred_until <= ?
                ORDER BY priority ASC, queued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING {COLUMNS}
            "
        ))
        .bind(to_millis(after(now, lease)))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;

        let entry = row.as_ref().map(row_to_entry).transpose()?;
        if let Some(entry) = &entry {
            debug!(id = %entry.id, message_id = %entry.message_id, "Claimed queue entry");
        }
        Ok(entry)
    }

    /// Defer an entry after a failed attempt: `deferred_until = now + backoff`
    /// and `retries += 1`.
    ///
    /// Returns the updated entry, or `None` if it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn defer(
        &self,
        id: QueuedMessageId,
        now: DateTime<Utc>,
        backoff: Duration,
    ) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            r"
            UPDATE queued_messages
            SET retries = retries + 1, deferred_until = ?
            WHERE id = ?
            RETURNING {COLUMNS}
            "
        ))
        .bind(to_millis(after(now, backoff)))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    /// Defer a claimed entry and record the failed attempt in one transaction.
    ///
    /// The update only applies while `entry.deferred_until` still matches the
    /// stored value, i.e. while the caller holds the lease it claimed. Returns
    /// the updated entry, or `None` if the entry is gone or was claimed by
    /// someone else; nothing is written in that case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails; nothing is written in that case.
    pub async fn fail(
        &self,
        entry: &QueuedMessage,
        now: DateTime<Utc>,
        backoff: Duration,
        detail: &str,
    ) -> Result<Option<QueuedMessage>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r"
            UPDATE queued_messages
            SET retries = retries + 1, deferred_until = ?
            WHERE id = ? AND deferred_until IS ?
            RETURNING {COLUMNS}
            "
        ))
        .bind(to_millis(after(now, backoff)))
        .bind(entry.id.0)
        .bind(lease_token(entry))
        .fetch_optional(&mut *tx)
        .await?;

        let updated = row.as_ref().map(row_to_entry).transpose()?;
        if let Some(updated) = &updated {
            insert_entry(&mut *tx, updated.message_id, ResultCode::Failed, detail, now).await?;
        }

        tx.commit().await?;
        Ok(updated)
    }

    /// Drop a lease without counting a retry; the entry is eligible again immediately.
    ///
    /// Returns false, changing nothing, if the entry is gone or its lease is
    /// no longer the one in `entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn release(&self, entry: &QueuedMessage) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE queued_messages SET deferred_until = NULL WHERE id = ? AND deferred_until IS ?",
        )
        .bind(entry.id.0)
        .bind(lease_token(entry))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated > 0)
    }

    /// Delete an entry. Removing an entry that is already gone is a no-op.
    ///
    /// Returns true if an entry was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove(&self, id: QueuedMessageId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM queued_messages WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Delete a claimed entry and record a terminal outcome in one transaction.
    ///
    /// Like [`fail`](Self::fail), this only applies while the caller still
    /// holds the lease in `entry`. The log entry is only written if the entry
    /// was deleted, so finishing twice never logs twice. Returns true if the
    /// entry was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails; nothing is written in that case.
    pub async fn finish(
        &self,
        entry: &QueuedMessage,
        result: ResultCode,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.delete_logged(entry.id, Some(lease_token(entry)), result, detail, now)
            .await
    }

    /// Permanently give up on an entry, whoever holds it: delete it and log
    /// `Abandoned`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn abandon(
        &self,
        id: QueuedMessageId,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.delete_logged(id, None, ResultCode::Abandoned, detail, now)
            .await
    }

    /// `lease` of `None` deletes unconditionally; `Some(token)` requires
    /// `deferred_until IS token`.
    async fn delete_logged(
        &self,
        id: QueuedMessageId,
        lease: Option<Option<i64>>,
        result: ResultCode,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let message_id: Option<i64> = sqlx::query_scalar(
            r"
            DELETE FROM queued_messages
            WHERE id = ? AND (? = 0 OR deferred_until IS ?)
            RETURNING message_id
            ",
        )
        .bind(id.0)
        .bind(lease.is_some())
        .bind(lease.flatten())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(message_id) = message_id {
            insert_entry(&mut *tx, MessageId::new(message_id), result, detail, now).await?;
        }

        tx.commit().await?;
        Ok(message_id.is_some())
    }

    /// Get an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: QueuedMessageId) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM queued_messages WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    /// Get the pending entry for a message, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_by_message(&self, message_id: MessageId) -> Result<Option<QueuedMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM queued_messages WHERE message_id = ?"
        ))
        .bind(message_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    /// All entries in dispatch order, regardless of eligibility.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS}
            FROM queued_messages
            ORDER BY priority ASC, queued_at ASC, id ASC
            "
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Number of entries in the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queued_messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Returns true if nothing is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Counts of ready and deferred entries at `now`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn stats(&self, now: DateTime<Utc>) -> Result<QueueStats> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN deferred_until IS NULL OR deferred_until <= ?
                                     THEN 1 ELSE 0 END), 0) AS ready
            FROM queued_messages
            ",
        )
        .bind(to_millis(now))
        .fetch_one(&self.pool)
        .await?;

        let total = u64::try_from(row.try_get::<i64, _>("total")?).unwrap_or_default();
        let ready = u64::try_from(row.try_get::<i64, _>("ready")?).unwrap_or_default();
        Ok(QueueStats {
            total,
            ready,
            deferred: total.saturating_sub(ready),
        })
    }
}

/// The stored form of an entry's lease, compared with `IS` so an unleased
/// entry (NULL) matches too.
fn lease_token(entry: &QueuedMessage) -> Option<i64> {
    entry.deferred_until.map(to_millis)
}

fn row_to_entry(row: &SqliteRow) -> Result<QueuedMessage> {
    let id = QueuedMessageId(row.try_get("id")?);
    let rank: i64 = row.try_get("priority")?;
    let priority = Priority::from_rank(rank)
        .ok_or_else(|| Error::corrupt("queued_messages", format!("entry {id}: priority {rank}")))?;
    let retries: i64 = row.try_get("retries")?;
    let retries = u32::try_from(retries)
        .map_err(|_| Error::corrupt("queued_messages", format!("entry {id}: retries {retries}")))?;
    let deferred_until: Option<i64> = row.try_get("deferred_until")?;

    Ok(QueuedMessage {
        id,
        message_id: MessageId::new(row.try_get("message_id")?),
        priority,
        deferred_until: deferred_until.map(from_millis).transpose()?,
        retries,
        queued_at: from_millis(row.try_get("queued_at")?)?,
    })
}
