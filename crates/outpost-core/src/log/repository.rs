//! Log storage repository.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteExecutor, SqlitePool, SqliteRow};
use super::model::{LogEntry, LogEntryId, ResultCode};
use crate::message::MessageId;
use crate::{Error, Result};
use crate::store::{from_millis, to_millis};

/// Repository for the delivery audit log.
#[derive(Debug, Clone)]
pub struct LogRepository {
    pool: SqlitePool,
}

impl LogRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an outcome for a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails. Callers must treat this
    /// as fatal for the enclosing operation.
    pub async fn record(
        &self,
        message_id: MessageId,
        result: ResultCode,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<LogEntryId> {
        insert_entry(&self.pool, message_id, result, detail, now).await
    }

    /// Full history for a message, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn for_message(&self, message_id: MessageId) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, message_id, result, created_at, detail
            FROM log_entries
            WHERE message_id = ?
            ORDER BY id ASC
            ",
        )
        .bind(message_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Most recent entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn recent(&self, limit: u32) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, message_id, result, created_at, detail
            FROM log_entries
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Number of entries per result code.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails or a stored result code
    /// is unknown.
    pub async fn count_by_result(&self) -> Result<HashMap<ResultCode, u64>> {
        let rows = sqlx::query("SELECT result, COUNT(*) AS count FROM log_entries GROUP BY result")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = HashMap::new();
        for row in &rows {
            let result: String = row.try_get("result")?;
            let count: i64 = row.try_get("count")?;
            counts.insert(parse_result(&result)?, u64::try_from(count).unwrap_or_default());
        }
        Ok(counts)
    }
}

/// Insert a log entry using any executor, so queue transitions can log inside
/// their own transaction.
pub(crate) async fn insert_entry<'e, E>(
    executor: E,
    message_id: MessageId,
    result: ResultCode,
    detail: &str,
    now: DateTime<Utc>,
) -> Result<LogEntryId>
where
    E: SqliteExecutor<'e>,
{
    let inserted = sqlx::query(
        r"
        INSERT INTO log_entries (message_id, result, created_at, detail)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(message_id.0)
    .bind(result.as_str())
    .bind(to_millis(now))
    .bind(detail)
    .execute(executor)
    .await?;

    Ok(LogEntryId(inserted.last_insert_rowid()))
}

fn parse_result(result: &str) -> Result<ResultCode> {
    ResultCode::parse(result)
        .ok_or_else(|| Error::corrupt("log_entries", format!("unknown result code {result:?}")))
}

/// Convert a database row to a log entry.
fn row_to_entry(row: &SqliteRow) -> Result<LogEntry> {
    let result: String = row.try_get("result")?;

    Ok(LogEntry {
        id: LogEntryId(row.try_get("id")?),
        message_id: MessageId::new(row.try_get("message_id")?),
        result: parse_result(&result)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        detail: row.try_get("detail")?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::Store;
    use crate::message::NewMessage;

    #[tokio::test]
    async fn test_record_and_history() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let msg = store
            .messages()
            .create(NewMessage::new("to@example.com", b"x".to_vec()), now)
            .await
            .unwrap();
        let log = store.log();

        log.record(msg.id, ResultCode::Failed, "timeout", now).await.unwrap();
        log.record(msg.id, ResultCode::Sent, "", now + TimeDelta::minutes(5))
            .await
            .unwrap();

        let history = log.for_message(msg.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].result, ResultCode::Failed);
        assert_eq!(history[0].detail, "timeout");
        assert_eq!(history[1].result, ResultCode::Sent);

        let recent = log.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].result, ResultCode::Sent);

        let counts = log.count_by_result().await.unwrap();
        assert_eq!(counts.get(&ResultCode::Failed), Some(&1));
        assert_eq!(counts.get(&ResultCode::Sent), Some(&1));
        assert_eq!(counts.get(&ResultCode::Skipped), None);
    }

    #[tokio::test]
    async fn test_record_for_unknown_message_fails() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let err = store
            .log()
            .record(MessageId::new(404), ResultCode::Sent, "", now)
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_errors() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        let msg = store
            .messages()
            .create(NewMessage::new("to@example.com", b"x".to_vec()), now)
            .await
            .unwrap();
        let log = store.log();
        let id = log.record(msg.id, ResultCode::Sent, "", now).await.unwrap();

        sqlx::query("UPDATE log_entries SET result = 'bounced' WHERE id = ?")
            .bind(id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = log.for_message(msg.id).await.unwrap_err();
        assert!(matches!(err, Error::CorruptRow { table: "log_entries", .. }));
        assert!(log.recent(10).await.unwrap_err().is_storage());
        assert!(log.count_by_result().await.unwrap_err().is_storage());

        sqlx::query("UPDATE log_entries SET result = 'sent', created_at = ? WHERE id = ?")
            .bind(i64::MAX)
            .bind(id.0)
            .execute(&store.pool)
            .await
            .unwrap();

        let err = log.recent(10).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTimestamp(i64::MAX)));
    }
}
