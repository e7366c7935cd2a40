// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use cambio::application::{AccountLedger, AddFundsRequest};
use cambio::domain::{
    CardDetails, CardGenerator, CardId, Cents, LedgerEvent, NewNotification, NewTransaction,
    NewUser, NewVirtualCard, Notification, Transaction, User, UserId, VirtualCard, expiry_for,
};
use cambio::notify::Notifier;
use cambio::rates::{FixedRates, RateError, RateProvider};
use cambio::storage::{
    LedgerStore, LedgerUnit, SqliteOptions, SqliteStore, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

pub const PASSWORD: &str = "correct horse battery";
pub const PREPAID_CODE: &str = "PREPAID-12345678";

/// Helper to create a store over a temporary database
pub async fn test_store() -> Result<(Arc<dyn LedgerStore>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::init(db_path.to_str().unwrap(), &SqliteOptions::default()).await?;
    Ok((Arc::new(store), temp_dir))
}

/// GYD/USD at 0.0048 and GYD/EUR at 0.125
pub fn test_rates() -> Arc<FixedRates> {
    Arc::new(
        FixedRates::new()
            .with_rate("GYD", "USD", dec!(0.0048))
            .with_rate("GYD", "EUR", dec!(0.125)),
    )
}

/// Helper to create a test ledger with fixed rates and a temporary database
pub async fn test_ledger() -> Result<(AccountLedger, TempDir)> {
    let (store, temp_dir) = test_store().await?;
    Ok((AccountLedger::new(store, test_rates()), temp_dir))
}

pub async fn register(ledger: &AccountLedger, username: &str) -> Result<User> {
    Ok(ledger.register_user(username, PASSWORD).await?)
}

pub async fn fund(ledger: &AccountLedger, user_id: i64, amount: &str) -> Result<User> {
    let result = ledger
        .add_funds(user_id, AddFundsRequest::new(PREPAID_CODE, amount))
        .await?;
    Ok(result.user)
}

/// A rate source that is always down.
pub struct FailingRates;

#[async_trait]
impl RateProvider for FailingRates {
    async fn quote(&self, _base: &str, quote: &str) -> Result<Decimal, RateError> {
        Err(RateError::MissingQuote(quote.to_string()))
    }
}

/// A rate source that answers after a delay.
pub struct SlowRates(pub Duration);

#[async_trait]
impl RateProvider for SlowRates {
    async fn quote(&self, _base: &str, _quote: &str) -> Result<Decimal, RateError> {
        tokio::time::sleep(self.0).await;
        Ok(dec!(0.0048))
    }
}

/// Keeps every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<LedgerEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, event: &LedgerEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Fails every delivery.
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _event: &LedgerEvent) -> Result<()> {
        anyhow::bail!("notification service unreachable")
    }
}

/// Hands out the given card numbers in order, repeating the last one.
pub struct ScriptedCards {
    numbers: Mutex<VecDeque<String>>,
    last: Mutex<String>,
}

impl ScriptedCards {
    pub fn new(numbers: &[&str]) -> Self {
        Self {
            numbers: Mutex::new(numbers.iter().map(|n| n.to_string()).collect()),
            last: Mutex::new(numbers.last().map(|n| n.to_string()).unwrap_or_default()),
        }
    }
}

impl CardGenerator for ScriptedCards {
    fn generate(&self, issued_at: DateTime<Utc>) -> CardDetails {
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.numbers.lock().unwrap().pop_front() {
            *last = next;
        }
        CardDetails {
            card_number: last.clone(),
            expiry_date: expiry_for(issued_at),
            cvv: "123".to_string(),
        }
    }
}

/// Wraps a real store; the first `conflicts` atomic units find the balance
/// already changed, as if another process had written it.
pub struct ConflictingStore {
    inner: Arc<dyn LedgerStore>,
    conflicts: u32,
    units: AtomicU32,
}

impl ConflictingStore {
    pub fn new(inner: Arc<dyn LedgerStore>, conflicts: u32) -> Self {
        Self {
            inner,
            conflicts,
            units: AtomicU32::new(0),
        }
    }

    /// Atomic units started so far.
    pub fn units_begun(&self) -> u32 {
        self.units.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for ConflictingStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.inner.create_user(user).await
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.inner.get_user_by_username(username).await
    }

    async fn begin(&self) -> StoreResult<Box<dyn LedgerUnit>> {
        let unit = self.units.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ConflictingUnit {
            inner: self.inner.begin().await?,
            conflict: unit < self.conflicts,
        }))
    }

    async fn insert_transaction(&self, transaction: NewTransaction) -> StoreResult<Transaction> {
        self.inner.insert_transaction(transaction).await
    }

    async fn list_transactions_by_user(&self, user_id: UserId) -> StoreResult<Vec<Transaction>> {
        self.inner.list_transactions_by_user(user_id).await
    }

    async fn list_active_cards_by_user(&self, user_id: UserId) -> StoreResult<Vec<VirtualCard>> {
        self.inner.list_active_cards_by_user(user_id).await
    }

    async fn deactivate_card(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> StoreResult<Option<VirtualCard>> {
        self.inner.deactivate_card(user_id, card_id).await
    }

    async fn insert_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        self.inner.insert_notification(notification).await
    }

    async fn list_notifications(&self, user_id: UserId) -> StoreResult<Vec<Notification>> {
        self.inner.list_notifications(user_id).await
    }

    async fn mark_notifications_read(&self, user_id: UserId) -> StoreResult<u64> {
        self.inner.mark_notifications_read(user_id).await
    }
}

struct ConflictingUnit {
    inner: Box<dyn LedgerUnit>,
    conflict: bool,
}

#[async_trait]
impl LedgerUnit for ConflictingUnit {
    async fn update_user_balance(
        &mut self,
        user_id: UserId,
        expected: Cents,
        new_balance: Cents,
    ) -> StoreResult<User> {
        if self.conflict {
            return Err(StoreError::Conflict(user_id));
        }
        self.inner
            .update_user_balance(user_id, expected, new_balance)
            .await
    }

    async fn insert_transaction(&mut self, transaction: NewTransaction) -> StoreResult<Transaction> {
        self.inner.insert_transaction(transaction).await
    }

    async fn insert_virtual_card(&mut self, card: NewVirtualCard) -> StoreResult<VirtualCard> {
        self.inner.insert_virtual_card(card).await
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.inner.commit().await
    }
}
