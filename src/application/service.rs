use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::{
    CardGenerator, CardId, Cents, DEFAULT_CURRENCY, LedgerEvent, NewTransaction, NewVirtualCard,
    Notification, ReconciliationReport, SecureCardGenerator, Transaction, TransactionKind, User,
    UserId, VirtualCard, convert_cents, format_cents, last4, reconcile,
};
use crate::notify::{Dispatcher, NoopNotifier, Notifier};
use crate::rates::RateProvider;
use crate::storage::{LedgerStore, StoreError};

use super::locks::UserLocks;
use super::requests::{AddFundsRequest, ConvertRequest, IssueCardRequest, mask_code};
use super::LedgerError;

/// Tunables for the account ledger.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Home currency of newly registered users
    pub default_currency: String,
    /// Upper bound on one exchange-rate quote
    pub rate_timeout: Duration,
    /// Attempts at an atomic unit when the balance changes underneath it
    pub balance_attempts: u32,
    /// Attempts at issuing a card when the generated number collides
    pub card_number_attempts: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY.to_string(),
            rate_timeout: Duration::from_secs(10),
            balance_attempts: 3,
            card_number_attempts: 5,
        }
    }
}

/// Result of a top-up
#[derive(Debug, Clone, Serialize)]
pub struct TopUpResult {
    pub user: User,
    pub transaction: Transaction,
}

/// Result of a conversion
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Target amount in cents, rounded half-up
    pub converted_amount: Cents,
    pub to_currency: String,
    pub rate: Decimal,
    pub transaction: Transaction,
}

/// Result of issuing a virtual card
#[derive(Debug, Clone, Serialize)]
pub struct CardIssuance {
    pub user: User,
    pub card: VirtualCard,
    pub transaction: Transaction,
}

/// A balance mutation planned against a freshly read user.
struct BalanceChange {
    new_balance: Cents,
    transaction: NewTransaction,
    card: Option<NewVirtualCard>,
}

struct Committed {
    user: User,
    transaction: Transaction,
    card: Option<VirtualCard>,
}

/// The account ledger: every operation that moves money goes through here.
/// This is the primary interface for any client (CLI, HTTP layer, etc.).
pub struct AccountLedger {
    store: Arc<dyn LedgerStore>,
    rates: Arc<dyn RateProvider>,
    notifier: Arc<dyn Notifier>,
    dispatcher: Dispatcher,
    cards: Arc<dyn CardGenerator>,
    locks: UserLocks,
    settings: LedgerSettings,
}

impl AccountLedger {
    /// Create a ledger over the given store and rate source, with default
    /// settings, no notifications and OS-random card numbers.
    pub fn new(store: Arc<dyn LedgerStore>, rates: Arc<dyn RateProvider>) -> Self {
        Self {
            store,
            rates,
            notifier: Arc::new(NoopNotifier),
            dispatcher: Dispatcher::new(),
            cards: Arc::new(SecureCardGenerator::default()),
            locks: UserLocks::new(),
            settings: LedgerSettings::default(),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_card_generator(mut self, cards: Arc<dyn CardGenerator>) -> Self {
        self.cards = cards;
        self
    }

    pub fn with_settings(mut self, settings: LedgerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Wait until every notification dispatched so far has been handled.
    pub async fn flush_notifications(&self) {
        self.dispatcher.flush().await;
    }

    // ========================
    // Money-moving operations
    // ========================

    /// Credit the user's balance from a prepaid code.
    #[instrument(skip(self, request))]
    pub async fn add_funds(
        &self,
        user_id: UserId,
        request: AddFundsRequest,
    ) -> Result<TopUpResult, LedgerError> {
        let topup = request.validate()?;
        let description = format!("Prepaid code load: {}", mask_code(&topup.code));

        let committed = self
            .commit_change(user_id, |user| {
                let new_balance = user.balance.checked_add(topup.amount).ok_or_else(|| {
                    LedgerError::Validation("Balance would overflow".to_string())
                })?;
                Ok(BalanceChange {
                    new_balance,
                    transaction: NewTransaction::completed(
                        user.id,
                        TransactionKind::Topup,
                        topup.amount,
                        user.currency.clone(),
                        description.clone(),
                    ),
                    card: None,
                })
            })
            .await?;

        info!(
            transaction_id = committed.transaction.id,
            amount = %format_cents(topup.amount),
            balance = %format_cents(committed.user.balance),
            "funds added"
        );
        self.notify(&committed.transaction);

        Ok(TopUpResult {
            user: committed.user,
            transaction: committed.transaction,
        })
    }

    /// Convert an amount of the wallet currency at the current market rate.
    ///
    /// Conversions are recorded, not settled: the balance is left untouched.
    #[instrument(skip(self, request))]
    pub async fn convert(
        &self,
        user_id: UserId,
        request: ConvertRequest,
    ) -> Result<ConversionResult, LedgerError> {
        let conversion = request.validate()?;
        let user = self.require_user(user_id).await?;
        if conversion.from_currency != user.currency {
            return Err(LedgerError::Validation(format!(
                "Source currency {} does not match wallet currency {}",
                conversion.from_currency, user.currency
            )));
        }

        // Quote before any lock is taken; a slow source must not block the account.
        let rate = self
            .fetch_rate(&conversion.from_currency, &conversion.to_currency)
            .await?;
        let converted_amount = convert_cents(conversion.amount, rate).ok_or_else(|| {
            LedgerError::Validation("Converted amount is out of range".to_string())
        })?;

        let description = format!(
            "Converted {} {} to {} {} at {}",
            format_cents(conversion.amount),
            conversion.from_currency,
            format_cents(converted_amount),
            conversion.to_currency,
            rate.normalize()
        );
        let transaction = self
            .store
            .insert_transaction(NewTransaction::completed(
                user.id,
                TransactionKind::Conversion,
                conversion.amount,
                conversion.from_currency.clone(),
                description,
            ))
            .await?;

        info!(
            transaction_id = transaction.id,
            %rate,
            converted = %format_cents(converted_amount),
            to = %conversion.to_currency,
            "conversion recorded"
        );
        self.notify(&transaction);

        Ok(ConversionResult {
            converted_amount,
            to_currency: conversion.to_currency,
            rate,
            transaction,
        })
    }

    /// Debit the balance onto a new active virtual card.
    #[instrument(skip(self, request))]
    pub async fn issue_card(
        &self,
        user_id: UserId,
        request: IssueCardRequest,
    ) -> Result<CardIssuance, LedgerError> {
        let card_request = request.validate()?;

        let committed = self
            .commit_change(user_id, |user| {
                if card_request.currency != user.currency {
                    return Err(LedgerError::Validation(format!(
                        "Cards can only be loaded in the wallet currency {}",
                        user.currency
                    )));
                }
                if card_request.amount > user.balance {
                    return Err(LedgerError::InsufficientBalance {
                        balance: user.balance,
                        required: card_request.amount,
                    });
                }

                let details = self.cards.generate(Utc::now());
                let description = format!("Virtual card issued: **** {}", last4(&details.card_number));
                Ok(BalanceChange {
                    new_balance: user.balance - card_request.amount,
                    transaction: NewTransaction::completed(
                        user.id,
                        TransactionKind::CardIssuance,
                        card_request.amount,
                        user.currency.clone(),
                        description,
                    ),
                    card: Some(NewVirtualCard {
                        user_id: user.id,
                        details,
                        amount: card_request.amount,
                        currency: user.currency.clone(),
                    }),
                })
            })
            .await?;

        let card = committed.card.ok_or_else(|| {
            LedgerError::Store(StoreError::Backend(anyhow::anyhow!(
                "card missing from committed issuance"
            )))
        })?;

        info!(
            transaction_id = committed.transaction.id,
            card_id = card.id,
            amount = %format_cents(card.amount),
            balance = %format_cents(committed.user.balance),
            "virtual card issued"
        );
        self.notify(&committed.transaction);

        Ok(CardIssuance {
            user: committed.user,
            card,
            transaction: committed.transaction,
        })
    }

    // ========================
    // Read operations
    // ========================

    /// Current state of the user, including the balance.
    pub async fn balance(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.require_user(user_id).await
    }

    /// The user's transactions, newest first.
    pub async fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, LedgerError> {
        self.require_user(user_id).await?;
        Ok(self.store.list_transactions_by_user(user_id).await?)
    }

    /// The user's active cards, newest first.
    pub async fn list_active_cards(&self, user_id: UserId) -> Result<Vec<VirtualCard>, LedgerError> {
        self.require_user(user_id).await?;
        Ok(self.store.list_active_cards_by_user(user_id).await?)
    }

    /// Check the stored balance against the transaction log.
    pub async fn reconcile(&self, user_id: UserId) -> Result<ReconciliationReport, LedgerError> {
        // Hold the lock so no in-flight mutation sits between the two reads.
        let _guard = self.locks.lock(user_id).await;
        let user = self.require_user(user_id).await?;
        let transactions = self.store.list_transactions_by_user(user_id).await?;
        Ok(reconcile(&user, &transactions))
    }

    // ========================
    // Card and notification management
    // ========================

    /// Deactivate one of the user's cards. No money moves.
    #[instrument(skip(self))]
    pub async fn deactivate_card(
        &self,
        user_id: UserId,
        card_id: CardId,
    ) -> Result<VirtualCard, LedgerError> {
        let card = self
            .store
            .deactivate_card(user_id, card_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("active card {}", card_id)))?;
        info!(card_id, "virtual card deactivated");
        Ok(card)
    }

    pub async fn notifications(&self, user_id: UserId) -> Result<Vec<Notification>, LedgerError> {
        self.require_user(user_id).await?;
        Ok(self.store.list_notifications(user_id).await?)
    }

    pub async fn mark_notifications_read(&self, user_id: UserId) -> Result<u64, LedgerError> {
        self.require_user(user_id).await?;
        Ok(self.store.mark_notifications_read(user_id).await?)
    }

    // ========================
    // Internals
    // ========================

    async fn require_user(&self, user_id: UserId) -> Result<User, LedgerError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("user {}", user_id)))
    }

    async fn fetch_rate(&self, base: &str, quote: &str) -> Result<Decimal, LedgerError> {
        let timeout = self.settings.rate_timeout;
        match tokio::time::timeout(timeout, self.rates.quote(base, quote)).await {
            Ok(Ok(rate)) if rate > Decimal::ZERO => Ok(rate),
            Ok(Ok(rate)) => Err(LedgerError::RateUnavailable(format!(
                "unusable rate {} for {}/{}",
                rate, base, quote
            ))),
            Ok(Err(err)) => {
                warn!(base, quote, error = %err, "rate quote failed");
                Err(LedgerError::RateUnavailable(err.to_string()))
            }
            Err(_) => {
                warn!(base, quote, ?timeout, "rate quote timed out");
                Err(LedgerError::RateUnavailable(format!(
                    "quote for {}/{} timed out after {:?}",
                    base, quote, timeout
                )))
            }
        }
    }

    /// Read the user, plan a change and apply it as one atomic unit, all under
    /// the user's lock. A stale balance or a card-number collision rolls the
    /// unit back and replans from a fresh read.
    async fn commit_change<F>(&self, user_id: UserId, mut plan: F) -> Result<Committed, LedgerError>
    where
        F: FnMut(&User) -> Result<BalanceChange, LedgerError> + Send,
    {
        let _guard = self.locks.lock(user_id).await;
        let mut conflicts = 0;
        let mut collisions = 0;

        loop {
            let user = self.require_user(user_id).await?;
            let change = plan(&user)?;

            match self.apply(&user, change).await {
                Ok(committed) => return Ok(committed),
                Err(StoreError::Conflict(_)) if conflicts + 1 < self.settings.balance_attempts => {
                    conflicts += 1;
                    warn!(user_id, attempt = conflicts, "balance changed concurrently, retrying");
                }
                Err(StoreError::DuplicateCardNumber)
                    if collisions + 1 < self.settings.card_number_attempts =>
                {
                    collisions += 1;
                    warn!(user_id, attempt = collisions, "card number collision, regenerating");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn apply(&self, user: &User, change: BalanceChange) -> Result<Committed, StoreError> {
        let mut unit = self.store.begin().await?;

        // Balance first, so the unit holds the write lock from its first statement.
        let updated = unit
            .update_user_balance(user.id, user.balance, change.new_balance)
            .await?;
        let card = match change.card {
            Some(card) => Some(unit.insert_virtual_card(card).await?),
            None => None,
        };
        let transaction = unit.insert_transaction(change.transaction).await?;
        unit.commit().await?;

        Ok(Committed {
            user: updated,
            transaction,
            card,
        })
    }

    fn notify(&self, transaction: &Transaction) {
        self.dispatcher.dispatch(
            self.notifier.clone(),
            LedgerEvent {
                user_id: transaction.user_id,
                transaction_id: transaction.id,
                kind: transaction.kind,
                amount: transaction.amount,
                currency: transaction.currency.clone(),
                description: transaction.description.clone(),
            },
        );
    }
}
