mod sqlite;

pub use sqlite::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    CardId, Cents, NewNotification, NewTransaction, NewUser, NewVirtualCard, Notification,
    Transaction, User, UserId, VirtualCard,
};

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

#[derive(Error, Debug)]
pub enum StoreError {
    /// The balance changed (or the user vanished) since it was read.
    #[error("Balance of user {0} changed concurrently")]
    Conflict(UserId),

    #[error("Card number already in use")]
    DuplicateCardNumber,

    #[error("Username already exists: {0}")]
    DuplicateUsername(String),

    #[error("Storage failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for users, transactions, virtual cards and notifications.
///
/// Reads and plain appends go through the store directly. Anything that moves
/// a balance goes through a [`LedgerUnit`] obtained from [`LedgerStore::begin`].
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Start an atomic unit. Dropping it without calling `commit` rolls it back.
    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>>;

    /// Append a transaction that has no balance effect.
    async fn insert_transaction(&self, transaction: NewTransaction) -> StoreResult<Transaction>;

    /// Newest first.
    async fn list_transactions_by_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>>;

    /// Newest first.
    async fn list_active_cards_by_user(&self, user_id: UserId) -> StoreResult<Vec<VirtualCard>>;

    /// Clear `is_active` on a card owned by `user_id`. Returns `None` if no
    /// such active card exists.
    async fn deactivate_card(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> StoreResult<Option<VirtualCard>>;

    async fn insert_notification(&self, notification: NewNotification)
    -> StoreResult<Notification>;

    /// Newest first.
    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>>;

    async fn mark_notifications_read(&self, user_id: UserId) -> StoreResult<u64>;
}

/// One all-or-nothing unit: a balance mutation plus the records that justify it.
#[async_trait]
pub trait LedgerUnit: Send {
    /// Compare-and-swap the balance. Fails with [`StoreError::Conflict`] if the
    /// stored balance is not `expected`.
    async fn update_user_balance(
        &mut self,
        user_id: UserId,
        expected: Cents,
        new_balance: Cents,
    ) -> StoreResult<User>;

    async fn insert_transaction(&mut self, transaction: NewTransaction)
    -> StoreResult<Transaction>;

    async fn insert_virtual_card(&mut self, card: NewVirtualCard) -> StoreResult<VirtualCard>;

    async fn commit(&mut self) -> StoreResult<()>;
}
