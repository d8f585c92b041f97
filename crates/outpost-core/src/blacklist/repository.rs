//! Blacklist storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::debug;

use super::model::{BlacklistEntry, normalize_address};
use crate::Result;
use crate::store::{from_millis, to_millis};

/// Repository for blacklisted addresses.
///
/// Reads take no locks; the dispatcher checks membership once per attempt.
#[derive(Debug, Clone)]
pub struct BlacklistRepository {
    pool: SqlitePool,
}

impl BlacklistRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add an address. Adding an address that is already present is a no-op.
    ///
    /// Returns true if the address was newly added.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn add(&self, address: &str, now: DateTime<Utc>) -> Result<bool> {
        let email = normalize_address(address);
        let inserted = sqlx::query("INSERT OR IGNORE INTO blacklist (email, date_added) VALUES (?, ?)")
            .bind(&email)
            .bind(to_millis(now))
            .execute(&self.pool)
            .await?
            .rows_affected();

        if inserted > 0 {
            debug!(email, "Blacklisted address");
        }
        Ok(inserted > 0)
    }

    /// Check whether an address is suppressed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn is_blacklisted(&self, address: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM blacklist WHERE email = ?")
            .bind(normalize_address(address))
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// All entries, most recently added first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<BlacklistEntry>> {
        let rows = sqlx::query(
            r"
            SELECT id, email, date_added
            FROM blacklist
            ORDER BY date_added DESC, id DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    /// Remove an address. Returns true if it was present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn remove(&self, address: &str) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM blacklist WHERE email = ?")
            .bind(normalize_address(address))
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<BlacklistEntry> {
    Ok(BlacklistEntry {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        date_added: from_millis(row.try_get("date_added")?)?,
    })
}
