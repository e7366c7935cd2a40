use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

pub type TransactionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Balance credited from a prepaid code
    Topup,
    /// Informational record of a conversion at a quoted rate
    Conversion,
    /// Balance debited onto a new virtual card
    CardIssuance,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Topup => "TOPUP",
            TransactionKind::Conversion => "CONVERSION",
            TransactionKind::CardIssuance => "CARD_ISSUANCE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TOPUP" => Some(TransactionKind::Topup),
            "CONVERSION" => Some(TransactionKind::Conversion),
            "CARD_ISSUANCE" => Some(TransactionKind::CardIssuance),
            _ => None,
        }
    }

    /// Signed effect of one unit of this kind on the wallet balance.
    pub fn balance_sign(&self) -> i64 {
        match self {
            TransactionKind::Topup => 1,
            TransactionKind::Conversion => 0,
            TransactionKind::CardIssuance => -1,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one ledger event.
/// Transactions are never updated - corrections are made via new compensating records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Monotonically increasing, assigned by the store
    pub id: TransactionId,
    pub user_id: UserId,
    pub kind: TransactionKind,
    /// Magnitude in cents (always positive), in `currency`
    pub amount: Cents,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: String,
    /// Assigned by the store at insert, never modified
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Signed balance delta this record accounts for.
    pub fn balance_delta(&self) -> Cents {
        if self.status == TransactionStatus::Completed {
            self.amount * self.kind.balance_sign()
        } else {
            0
        }
    }
}

/// A transaction about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub kind: TransactionKind,
    pub amount: Cents,
    pub currency: String,
    pub status: TransactionStatus,
    pub description: String,
}

impl NewTransaction {
    /// Create a completed record. Amount must be positive.
    pub fn completed(
        user_id: UserId,
        kind: TransactionKind,
        amount: Cents,
        currency: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            user_id,
            kind,
            amount,
            currency: currency.into(),
            status: TransactionStatus::Completed,
            description: description.into(),
        }
    }
}
