use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, TransactionId, TransactionKind, UserId, format_cents};

pub type NotificationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Transaction,
    Security,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Transaction => "TRANSACTION",
            NotificationKind::Security => "SECURITY",
            NotificationKind::System => "SYSTEM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TRANSACTION" => Some(NotificationKind::Transaction),
            "SECURITY" => Some(NotificationKind::Security),
            "SYSTEM" => Some(NotificationKind::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: UserId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

/// What happened in a committed ledger operation, handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    pub user_id: UserId,
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    pub amount: Cents,
    pub currency: String,
    pub description: String,
}

impl LedgerEvent {
    pub fn title(&self) -> &'static str {
        match self.kind {
            TransactionKind::Topup => "Funds added",
            TransactionKind::Conversion => "Currency converted",
            TransactionKind::CardIssuance => "Virtual card issued",
        }
    }

    pub fn message(&self) -> String {
        format!(
            "{} {}: {}",
            format_cents(self.amount),
            self.currency,
            self.description
        )
    }

    pub fn to_notification(&self) -> NewNotification {
        NewNotification {
            user_id: self.user_id,
            kind: NotificationKind::Transaction,
            title: self.title().to_string(),
            message: self.message(),
        }
    }
}
