//! Account storage repository.

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use tracing::{debug, info};

use super::model::{Account, AccountId, Security, SmtpConfig};
use super::validation::validate_account;
use crate::store::{from_millis, to_millis};
use crate::{Error, Result};

pub(super) const COLUMNS: &str = r"
    id, host_user, host_password, default_from,
    smtp_host, smtp_port, smtp_security,
    daily_cap, enabled, created_at, updated_at
";

/// Repository for account administration.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: SqlitePool,
}

impl AccountRepository {
    pub(crate) const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get all accounts, in selection order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!("SELECT {COLUMNS} FROM accounts ORDER BY id ASC"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_account).collect()
    }

    /// Get account by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get(&self, id: AccountId) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM accounts WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Get account by host user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_by_host_user(&self, host_user: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM accounts WHERE host_user = ?"))
            .bind(host_user)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    /// Save an account (insert or update).
    ///
    /// Validates the account first. On insert the account's `id` is set; in
    /// both cases its timestamps are refreshed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if validation fails,
    /// [`Error::DuplicateAccount`] if another account has the same host user,
    /// or an error if the database query fails.
    pub async fn save(&self, account: &mut Account, now: DateTime<Utc>) -> Result<()> {
        validate_account(account).map_err(Error::Invalid)?;

        let result = if let Some(id) = account.id {
            self.update(id, account, now).await
        } else {
            self.insert(account, now).await
        };

        result.map_err(|e| match e {
            Error::Database(db) if Error::is_unique_violation(&db) => {
                Error::DuplicateAccount(account.host_user.clone())
            }
            other => other,
        })
    }

    async fn insert(&self, account: &mut Account, now: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r"
            INSERT INTO accounts (
                host_user, host_password, default_from,
                smtp_host, smtp_port, smtp_security,
                daily_cap, enabled, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(&account.host_user)
        .bind(&account.host_password)
        .bind(&account.default_from)
        .bind(&account.smtp.host)
        .bind(account.smtp.port)
        .bind(account.smtp.security.as_str())
        .bind(account.daily_cap)
        .bind(account.enabled)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;

        let id = AccountId::new(result.last_insert_rowid());
        account.id = Some(id);
        account.created_at = Some(now);
        account.updated_at = Some(now);
        info!(%id, host_user = %account.host_user, "Added account");
        Ok(())
    }

    async fn update(&self, id: AccountId, account: &mut Account, now: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            r"
            UPDATE accounts SET
                host_user = ?, host_password = ?, default_from = ?,
                smtp_host = ?, smtp_port = ?, smtp_security = ?,
                daily_cap = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(&account.host_user)
        .bind(&account.host_password)
        .bind(&account.default_from)
        .bind(&account.smtp.host)
        .bind(account.smtp.port)
        .bind(account.smtp.security.as_str())
        .bind(account.daily_cap)
        .bind(account.enabled)
        .bind(to_millis(now))
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::AccountNotFound(id));
        }

        account.updated_at = Some(now);
        debug!(%id, "Updated account");
        Ok(())
    }

    /// Enable or disable an account. Disabled accounts are never selected
    /// for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccountNotFound`] if no such account exists, or an
    /// error if the database query fails.
    pub async fn set_enabled(
        &self,
        id: AccountId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE accounts SET enabled = ?, updated_at = ? WHERE id = ?")
            .bind(enabled)
            .bind(to_millis(now))
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(Error::AccountNotFound(id));
        }

        info!(%id, enabled, "Changed account state");
        Ok(())
    }

    /// Delete an account and its send history.
    ///
    /// Returns true if an account was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn delete(&self, id: AccountId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }
}

/// Convert a database row to an Account.
pub(super) fn row_to_account(row: &SqliteRow) -> Result<Account> {
    let security: String = row.try_get("smtp_security")?;
    let port: i64 = row.try_get("smtp_port")?;
    let port = u16::try_from(port)
        .map_err(|_| Error::corrupt("accounts", format!("smtp_port {port}")))?;
    let daily_cap: i64 = row.try_get("daily_cap")?;
    let daily_cap = u32::try_from(daily_cap)
        .map_err(|_| Error::corrupt("accounts", format!("daily_cap {daily_cap}")))?;
    Ok(Account {
        id: Some(AccountId::new(row.try_get("id")?)),
        host_user: row.try_get("host_user")?,
        host_password: row.try_get("host_password")?,
        default_from: row.try_get("default_from")?,
        smtp: SmtpConfig {
            host: row.try_get("smtp_host")?,
            port,
            security: Security::parse(&security),
        },
        daily_cap,
        enabled: row.try_get("enabled")?,
        created_at: Some(from_millis(row.try_get("created_at")?)?),
        updated_at: Some(from_millis(row.try_get("updated_at")?)?),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;
    use crate::Store;
    use crate::account::ValidationError;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 5, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get_account() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut account = Account::with_host_user("sender@example.com");
        account.host_password = "secret".to_string();
        account.daily_cap = 25;
        repo.save(&mut account, now()).await.unwrap();

        let id = account.id.unwrap();
        let loaded = repo.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.host_user, "sender@example.com");
        assert_eq!(loaded.host_password, "secret");
        assert_eq!(loaded.smtp.host, "smtp.example.com");
        assert_eq!(loaded.smtp.security, Security::StartTls);
        assert_eq!(loaded.daily_cap, 25);
        assert!(loaded.enabled);
        assert_eq!(loaded.created_at, Some(now()));
    }

    #[tokio::test]
    async fn test_update_account() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut account = Account::with_host_user("sender@example.com");
        repo.save(&mut account, now()).await.unwrap();

        account.daily_cap = 1;
        account.smtp.security = Security::Tls;
        let later = now() + TimeDelta::hours(1);
        repo.save(&mut account, later).await.unwrap();

        let loaded = repo.get(account.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.daily_cap, 1);
        assert_eq!(loaded.smtp.security, Security::Tls);
        assert_eq!(loaded.created_at, Some(now()));
        assert_eq!(loaded.updated_at, Some(later));
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_host_user_rejected() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut first = Account::with_host_user("sender@example.com");
        repo.save(&mut first, now()).await.unwrap();

        let mut second = Account::with_host_user("sender@example.com");
        let err = repo.save(&mut second, now()).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateAccount(user) if user == "sender@example.com"));
        assert!(second.id.is_none());
    }

    #[tokio::test]
    async fn test_invalid_account_not_saved() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut account = Account::with_host_user("sender@example.com");
        account.daily_cap = 0;
        let err = repo.save(&mut account, now()).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(ref errors) if errors == &[ValidationError::ZeroDailyCap]));
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_set_enabled() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut account = Account::with_host_user("sender@example.com");
        repo.save(&mut account, now()).await.unwrap();
        let id = account.id.unwrap();

        repo.set_enabled(id, false, now()).await.unwrap();
        assert!(!repo.get(id).await.unwrap().unwrap().enabled);

        let missing = repo.set_enabled(AccountId::new(99), true, now()).await;
        assert!(matches!(missing, Err(Error::AccountNotFound(AccountId(99)))));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        for user in ["b@example.com", "a@example.com"] {
            let mut account = Account::with_host_user(user);
            repo.save(&mut account, now()).await.unwrap();
        }

        let users: Vec<_> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.host_user)
            .collect();
        assert_eq!(users, ["b@example.com", "a@example.com"]);

        let found = repo.get_by_host_user("a@example.com").await.unwrap().unwrap();
        assert!(repo.delete(found.id.unwrap()).await.unwrap());
        assert!(!repo.delete(found.id.unwrap()).await.unwrap());
        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_port_is_an_error() {
        let store = Store::in_memory().await.unwrap();
        let repo = store.accounts();

        let mut account = Account::with_host_user("sender@example.com");
        repo.save(&mut account, now()).await.unwrap();
        sqlx::query("UPDATE accounts SET smtp_port = 70000")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = repo.get(account.id.unwrap()).await.unwrap_err();
        assert!(matches!(err, Error::CorruptRow { table: "accounts", .. }));
        assert!(err.is_storage());
    }
}
