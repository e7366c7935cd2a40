use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool};

use crate::domain::{
    CardId, Cents, NewNotification, NewTransaction, NewUser, NewVirtualCard, Notification,
    NotificationKind, Transaction, TransactionKind, TransactionStatus, User, UserId, VirtualCard,
};

use super::{LedgerStore, LedgerUnit, MIGRATION_001_INITIAL, StoreError, StoreResult};

const USER_COLUMNS: &str = "id, username, password_hash, balance_cents, currency, created_at";
const TRANSACTION_COLUMNS: &str =
    "id, user_id, kind, amount_cents, currency, status, description, created_at";
const CARD_COLUMNS: &str =
    "id, user_id, card_number, expiry_date, cvv, amount_cents, currency, is_active, created_at";
const NOTIFICATION_COLUMNS: &str = "id, user_id, kind, title, message, is_read, created_at";

/// Connection settings for [`SqliteStore::open`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed ledger store.
///
/// Timestamps are taken inside the INSERT statement, while SQLite holds its
/// write lock, so id order and `created_at` order always agree.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a SQLite database file, creating it if it doesn't exist.
    pub async fn open(path: &str, options: &SqliteOptions) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))
            .context("Invalid database path")?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .connect_with(connect_options)
            .await
            .context("Failed to connect to database")?;

        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a database (open + migrate).
    pub async fn init(path: &str, options: &SqliteOptions) -> Result<Self> {
        let store = Self::open(path, options).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let created_at_str: String = row.get("created_at");

        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            balance: row.get("balance_cents"),
            currency: row.get("currency"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let created_at_str: String = row.get("created_at");

        Ok(Transaction {
            id: row.get("id"),
            user_id: row.get("user_id"),
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction kind: {}", kind_str))?,
            amount: row.get("amount_cents"),
            currency: row.get("currency"),
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction status: {}", status_str))?,
            description: row.get("description"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_card(row: &SqliteRow) -> Result<VirtualCard> {
        let created_at_str: String = row.get("created_at");

        Ok(VirtualCard {
            id: row.get("id"),
            user_id: row.get("user_id"),
            card_number: row.get("card_number"),
            expiry_date: row.get("expiry_date"),
            cvv: row.get("cvv"),
            amount: row.get("amount_cents"),
            currency: row.get("currency"),
            is_active: row.get("is_active"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }

    fn row_to_notification(row: &SqliteRow) -> Result<Notification> {
        let kind_str: String = row.get("kind");
        let created_at_str: String = row.get("created_at");

        Ok(Notification {
            id: row.get("id"),
            user_id: row.get("user_id"),
            kind: NotificationKind::from_str(&kind_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid notification kind: {}", kind_str))?,
            title: row.get("title"),
            message: row.get("message"),
            is_read: row.get("is_read"),
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp: {}", value))?
        .with_timezone(&Utc))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

async fn insert_transaction_row(
    conn: &mut SqliteConnection,
    transaction: &NewTransaction,
) -> Result<Transaction> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO transactions (user_id, kind, amount_cents, currency, status, description, created_at)
        VALUES (?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        RETURNING {}
        "#,
        TRANSACTION_COLUMNS
    ))
    .bind(transaction.user_id)
    .bind(transaction.kind.as_str())
    .bind(transaction.amount)
    .bind(&transaction.currency)
    .bind(transaction.status.as_str())
    .bind(&transaction.description)
    .fetch_one(conn)
    .await
    .context("Failed to save transaction")?;

    SqliteStore::row_to_transaction(&row)
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO users (username, password_hash, balance_cents, currency, created_at)
            VALUES (?, ?, 0, ?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.currency)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(Self::row_to_user(&row)?),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateUsername(user.username))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to save user")
                .into()),
        }
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user by username")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(SqliteUnit { tx: Some(tx) }))
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> StoreResult<Transaction> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Ok(insert_transaction_row(&mut conn, &transaction).await?)
    }

    async fn list_transactions_by_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE user_id = ? ORDER BY id DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        Ok(rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<_>>()?)
    }

    async fn list_active_cards_by_user(&self, user_id: UserId) -> StoreResult<Vec<VirtualCard>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM virtual_cards WHERE user_id = ? AND is_active = 1 ORDER BY id DESC",
            CARD_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list virtual cards")?;

        Ok(rows.iter().map(Self::row_to_card).collect::<Result<_>>()?)
    }

    async fn deactivate_card(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> StoreResult<Option<VirtualCard>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE virtual_cards
            SET is_active = 0
            WHERE id = ? AND user_id = ? AND is_active = 1
            RETURNING {}
            "#,
            CARD_COLUMNS
        ))
        .bind(card_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to deactivate card")?;

        match row {
            Some(row) => Ok(Some(Self::row_to_card(&row)?)),
            None => Ok(None),
        }
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO notifications (user_id, kind, title, message, is_read, created_at)
            VALUES (?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            RETURNING {}
            "#,
            NOTIFICATION_COLUMNS
        ))
        .bind(notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .fetch_one(&self.pool)
        .await
        .context("Failed to save notification")?;

        Ok(Self::row_to_notification(&row)?)
    }

    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM notifications WHERE user_id = ? ORDER BY id DESC",
            NOTIFICATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list notifications")?;

        Ok(rows
            .iter()
            .map(Self::row_to_notification)
            .collect::<Result<_>>()?)
    }

    async fn mark_notifications_read(&self, user_id: UserId) -> StoreResult<u64> {
        let result =
            sqlx::query("UPDATE notifications SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(user_id)
                .execute(&self.pool)
                .await
                .context("Failed to mark notifications read")?;

        Ok(result.rows_affected())
    }
}

/// A database transaction wrapping one ledger unit. Rolled back on drop unless committed.
pub struct SqliteUnit {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
}

impl SqliteUnit {
    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| anyhow::anyhow!("Ledger unit already committed"))
    }
}

#[async_trait]
impl LedgerUnit for SqliteUnit {
    async fn update_user_balance(
        &mut self,
        user_id: UserId,
        expected: Cents,
        new_balance: Cents,
    ) -> StoreResult<User> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE users
            SET balance_cents = ?
            WHERE id = ? AND balance_cents = ?
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(new_balance)
        .bind(user_id)
        .bind(expected)
        .fetch_optional(self.conn()?)
        .await
        .context("Failed to update balance")?;

        match row {
            Some(row) => Ok(SqliteStore::row_to_user(&row)?),
            None => Err(StoreError::Conflict(user_id)),
        }
    }

    async fn insert_transaction(
        &mut self,
        transaction: NewTransaction,
    ) -> StoreResult<Transaction> {
        Ok(insert_transaction_row(self.conn()?, &transaction).await?)
    }

    async fn insert_virtual_card(&mut self, card: NewVirtualCard) -> StoreResult<VirtualCard> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO virtual_cards (user_id, card_number, expiry_date, cvv, amount_cents, currency, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            RETURNING {}
            "#,
            CARD_COLUMNS
        ))
        .bind(card.user_id)
        .bind(&card.details.card_number)
        .bind(&card.details.expiry_date)
        .bind(&card.details.cvv)
        .bind(card.amount)
        .bind(&card.currency)
        .fetch_one(self.conn()?)
        .await;

        match result {
            Ok(row) => Ok(SqliteStore::row_to_card(&row)?),
            Err(err) if is_unique_violation(&err) => Err(StoreError::DuplicateCardNumber),
            Err(err) => Err(anyhow::Error::new(err)
                .context("Failed to save virtual card")
                .into()),
        }
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| anyhow::anyhow!("Ledger unit already committed"))?;
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(())
    }
}
