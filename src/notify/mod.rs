//! Post-commit notification hook.
//!
//! Notifiers run after a ledger operation has committed. They are detached
//! from the caller: a failing or slow notifier never fails or delays the
//! operation that triggered it.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::LedgerEvent;
use crate::storage::LedgerStore;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &LedgerEvent) -> anyhow::Result<()>;
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _event: &LedgerEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Records each event as a user notification in the ledger store.
pub struct StoreNotifier {
    store: Arc<dyn LedgerStore>,
}

impl StoreNotifier {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Notifier for StoreNotifier {
    async fn notify(&self, event: &LedgerEvent) -> anyhow::Result<()> {
        self.store
            .insert_notification(event.to_notification())
            .await?;
        Ok(())
    }
}

/// Runs notifiers on background tasks.
///
/// Delivery is detached from the operation that produced the event. The
/// dispatcher only keeps the task handles so a short-lived process can wait
/// for outstanding deliveries with [`Dispatcher::flush`] before exiting.
#[derive(Default)]
pub struct Dispatcher {
    tasks: Mutex<JoinSet<()>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand an event to the notifier and return immediately.
    pub fn dispatch(&self, notifier: Arc<dyn Notifier>, event: LedgerEvent) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished deliveries so the set only holds in-flight ones.
        while tasks.try_join_next().is_some() {}
        tasks.spawn(deliver(notifier, event));
    }

    /// Wait for every delivery dispatched so far.
    pub async fn flush(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        while tasks.join_next().await.is_some() {}
    }
}

async fn deliver(notifier: Arc<dyn Notifier>, event: LedgerEvent) {
    match notifier.notify(&event).await {
        Ok(()) => debug!(
            user_id = event.user_id,
            transaction_id = event.transaction_id,
            "notification delivered"
        ),
        Err(err) => warn!(
            user_id = event.user_id,
            transaction_id = event.transaction_id,
            error = %err,
            "notification failed"
        ),
    }
}
