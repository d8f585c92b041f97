//! Account selection under daily send caps.
//!
//! Every send is charged to an account by a row in `account_sends`, keyed by
//! the UTC day it happened on. A [`Reservation`] is taken before the transport
//! is called and released again if the send fails, so only delivered messages
//! count against the cap.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, trace};

use super::model::{Account, AccountId};
use super::repository::{COLUMNS, row_to_account};
use crate::Result;
use crate::message::MessageId;
use crate::store::{day_key, to_millis};

/// A send slot charged to an account for the current day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: i64,
    /// ID of the charged account.
    pub account_id: AccountId,
    /// Account the slot was taken from.
    pub account: Account,
}

/// Picks sending accounts with headroom under their daily cap.
#[derive(Debug, Clone)]
pub struct AccountPool {
    pool: SqlitePool,
}

impl AccountPool {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// First enabled account (lowest id) that has sent fewer than `daily_cap`
    /// messages on `now`'s UTC day. Does not reserve anything.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn select_available(&self, now: DateTime<Utc>) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            r"
            SELECT {COLUMNS}
            FROM accounts a
            WHERE a.enabled = 1
              AND (SELECT COUNT(*) FROM account_sends s
                   WHERE s.account_id = a.id AND s.day = ?) < a.daily_cap
            ORDER BY a.id ASC
            LIMIT 1
            "
        ))
        .bind(day_key(now))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Atomically charge one send to the first available account.
    ///
    /// Returns `None` when every enabled account is at its cap. Concurrent
    /// callers can never push an account over its cap: the check and the
    /// charge are one statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn reserve(
        &self,
        message_id: MessageId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        let day = day_key(now);
        let row = sqlx::query(
            r"
            INSERT INTO account_sends (account_id, message_id, day, sent_at)
            SELECT a.id, ?, ?, ?
            FROM accounts a
            WHERE a.enabled = 1
              AND (SELECT COUNT(*) FROM account_sends s
                   WHERE s.account_id = a.id AND s.day = ?) < a.daily_cap
            ORDER BY a.id ASC
            LIMIT 1
            RETURNING id, account_id
            ",
        )
        .bind(message_id.0)
        .bind(&day)
        .bind(to_millis(now))
        .bind(&day)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            trace!(%message_id, "No account has capacity");
            return Ok(None);
        };

        let id: i64 = row.try_get("id")?;
        let account_id = AccountId::new(row.try_get("account_id")?);
        let account = sqlx::query(&format!("SELECT {COLUMNS} FROM accounts WHERE id = ?"))
            .bind(account_id.0)
            .fetch_one(&self.pool)
            .await?;
        let account = row_to_account(&account)?;

        debug!(%message_id, %account_id, "Reserved send slot");
        Ok(Some(Reservation {
            id,
            account_id,
            account,
        }))
    }

    /// Give back a reservation whose send did not go through.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn release(&self, reservation: &Reservation) -> Result<()> {
        sqlx::query("DELETE FROM account_sends WHERE id = ?")
            .bind(reservation.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of sends charged to an account on `now`'s UTC day.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn sent_today(&self, id: AccountId, now: DateTime<Utc>) -> Result<u32> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM account_sends WHERE account_id = ? AND day = ?")
                .bind(id.0)
                .bind(day_key(now))
                .fetch_one(&self.pool)
                .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    /// Every account with its send count for `now`'s UTC day, in selection order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn usage(&self, now: DateTime<Utc>) -> Result<Vec<(Account, u32)>> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {COLUMNS},
                   (SELECT COUNT(*) FROM account_sends s
                    WHERE s.account_id = accounts.id AND s.day = ?) AS sent_today
            FROM accounts
            ORDER BY id ASC
            "
        ))
        .bind(day_key(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let sent = row.try_get::<i64, _>("sent_today")?;
                Ok((row_to_account(row)?, u32::try_from(sent).unwrap_or(u32::MAX)))
            })
            .collect()
    }
}
