//! Shared `SQLite` store.
//!
//! All collections live in one database so that queue transitions and their
//! log entries can be written in a single transaction.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::account::{AccountPool, AccountRepository};
use crate::blacklist::BlacklistRepository;
use crate::log::LogRepository;
use crate::message::MessageRepository;
use crate::queue::QueueRepository;
use crate::{Error, Result};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to the outpost database.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at the given path.
    ///
    /// Creates the parent directory, the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created, the database
    /// connection fails or schema creation fails.
    pub async fn new(database_path: impl AsRef<Path>) -> Result<Self> {
        let path = database_path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .in_memory(true)
            .foreign_keys(true);

        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        const SCHEMA: &[&str] = &[
            r"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                to_address TEXT NOT NULL,
                from_address TEXT NOT NULL,
                subject TEXT NOT NULL DEFAULT '',
                encoded_message BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at)
            ",
            r"
            CREATE TABLE IF NOT EXISTS queued_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL UNIQUE
                    REFERENCES messages(id) ON DELETE CASCADE,
                priority INTEGER NOT NULL,
                deferred_until INTEGER,
                retries INTEGER NOT NULL DEFAULT 0,
                queued_at INTEGER NOT NULL
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_queued_order
            ON queued_messages(priority, queued_at, id)
            ",
            r"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                host_user TEXT NOT NULL UNIQUE,
                host_password TEXT NOT NULL DEFAULT '',
                default_from TEXT NOT NULL,
                smtp_host TEXT NOT NULL,
                smtp_port INTEGER NOT NULL,
                smtp_security TEXT NOT NULL,
                daily_cap INTEGER NOT NULL CHECK (daily_cap > 0),
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS account_sends (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
                message_id INTEGER NOT NULL,
                day TEXT NOT NULL,
                sent_at INTEGER NOT NULL
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_account_sends_day
            ON account_sends(account_id, day)
            ",
            r"
            CREATE TABLE IF NOT EXISTS blacklist (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                date_added INTEGER NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS log_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id INTEGER NOT NULL REFERENCES messages(id),
                result TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                detail TEXT NOT NULL DEFAULT ''
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_log_message ON log_entries(message_id, id)
            ",
        ];

        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Message store.
    #[must_use]
    pub fn messages(&self) -> MessageRepository {
        MessageRepository::new(self.pool.clone())
    }

    /// Pending-send queue.
    #[must_use]
    pub fn queue(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    /// Account administration.
    #[must_use]
    pub fn accounts(&self) -> AccountRepository {
        AccountRepository::new(self.pool.clone())
    }

    /// Account selection under daily caps.
    #[must_use]
    pub fn account_pool(&self) -> AccountPool {
        AccountPool::new(self.pool.clone())
    }

    /// Suppressed recipients.
    #[must_use]
    pub fn blacklist(&self) -> BlacklistRepository {
        BlacklistRepository::new(self.pool.clone())
    }

    /// Delivery audit log.
    #[must_use]
    pub fn log(&self) -> LogRepository {
        LogRepository::new(self.pool.clone())
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Encode a timestamp for storage.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Decode a stored timestamp.
pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(Error::InvalidTimestamp(millis))
}

/// `now + delay`, saturating instead of overflowing.
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Calendar day (UTC) used for daily send caps.
pub(crate) fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}
