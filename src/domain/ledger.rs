use serde::Serialize;

use super::{Cents, Transaction, TransactionKind, TransactionStatus, User, UserId};

/// Compute the balance implied by a user's transaction log.
/// Balance = completed top-ups - completed card issuances. Conversions are neutral.
pub fn compute_balance(transactions: &[Transaction]) -> Cents {
    transactions
        .iter()
        .fold(0, |balance, transaction| balance + transaction.balance_delta())
}

/// Outcome of checking a user's stored balance against their transaction log.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    pub user_id: UserId,
    pub balance: Cents,
    pub credits: Cents,
    pub debits: Cents,
    pub expected_balance: Cents,
    pub transaction_count: usize,
    pub issues: Vec<String>,
}

impl ReconciliationReport {
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Reconcile a user against their transactions (any order).
pub fn reconcile(user: &User, transactions: &[Transaction]) -> ReconciliationReport {
    let mut issues = Vec::new();

    let sum_of = |kind: TransactionKind| -> Cents {
        transactions
            .iter()
            .filter(|t| t.kind == kind && t.status == TransactionStatus::Completed)
            .map(|t| t.amount)
            .sum()
    };
    let credits = sum_of(TransactionKind::Topup);
    let debits = sum_of(TransactionKind::CardIssuance);
    let expected_balance = compute_balance(transactions);

    if user.balance < 0 {
        issues.push(format!("Balance is negative: {}", user.balance));
    }
    if expected_balance != user.balance {
        issues.push(format!(
            "Balance {} does not match transaction log ({})",
            user.balance, expected_balance
        ));
    }

    for transaction in transactions {
        if transaction.user_id != user.id {
            issues.push(format!(
                "Transaction {} belongs to user {}",
                transaction.id, transaction.user_id
            ));
        }
        if transaction.amount <= 0 {
            issues.push(format!(
                "Transaction {} has non-positive amount {}",
                transaction.id, transaction.amount
            ));
        }
        if transaction.kind != TransactionKind::Conversion && transaction.currency != user.currency
        {
            issues.push(format!(
                "Transaction {} is in {} but the wallet holds {}",
                transaction.id, transaction.currency, user.currency
            ));
        }
    }

    let mut by_id: Vec<&Transaction> = transactions.iter().collect();
    by_id.sort_by_key(|t| t.id);
    for pair in by_id.windows(2) {
        if pair[1].created_at < pair[0].created_at {
            issues.push(format!(
                "Transaction {} was recorded before transaction {}",
                pair[1].id, pair[0].id
            ));
        }
    }

    ReconciliationReport {
        user_id: user.id,
        balance: user.balance,
        credits,
        debits,
        expected_balance,
        transaction_count: transactions.len(),
        issues,
    }
}
