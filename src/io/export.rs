use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::AccountLedger;
use crate::domain::{
    CardId, Cents, ReconciliationReport, Transaction, User, UserId, VirtualCard, format_cents,
};

/// Everything held for one account, for a JSON export.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub user: User,
    pub transactions: Vec<Transaction>,
    pub cards: Vec<MaskedCard>,
    pub reconciliation: ReconciliationReport,
}

/// A card as it appears in exports: no full number, no CVV.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedCard {
    pub id: CardId,
    pub card_number: String,
    pub expiry_date: String,
    pub amount: Cents,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

impl From<&VirtualCard> for MaskedCard {
    fn from(card: &VirtualCard) -> Self {
        Self {
            id: card.id,
            card_number: mask_card_number(card),
            expiry_date: card.expiry_date.clone(),
            amount: card.amount,
            currency: card.currency.clone(),
            created_at: card.created_at,
        }
    }
}

fn mask_card_number(card: &VirtualCard) -> String {
    format!("**** **** **** {}", card.last4())
}

/// Exporter for a user's ledger data
pub struct Exporter<'a> {
    ledger: &'a AccountLedger,
}

impl<'a> Exporter<'a> {
    pub fn new(ledger: &'a AccountLedger) -> Self {
        Self { ledger }
    }

    /// Export the user's transactions to CSV, oldest first
    pub async fn export_transactions_csv<W: Write>(&self, user_id: UserId, writer: W) -> Result<usize> {
        let transactions = self.ledger.list_transactions(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "created_at",
            "type",
            "amount",
            "currency",
            "status",
            "description",
        ])?;

        let mut count = 0;
        for tx in transactions.iter().rev() {
            csv_writer.write_record([
                tx.id.to_string(),
                tx.created_at.to_rfc3339(),
                tx.kind.as_str().to_string(),
                format_cents(tx.amount),
                tx.currency.clone(),
                tx.status.as_str().to_string(),
                tx.description.clone(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the user's active cards to CSV with masked numbers
    pub async fn export_cards_csv<W: Write>(&self, user_id: UserId, writer: W) -> Result<usize> {
        let cards = self.ledger.list_active_cards(user_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(["id", "card_number", "expiry", "amount", "currency", "issued_at"])?;

        let mut count = 0;
        for card in &cards {
            csv_writer.write_record([
                card.id.to_string(),
                mask_card_number(card),
                card.expiry_date.clone(),
                format_cents(card.amount),
                card.currency.clone(),
                card.created_at.to_rfc3339(),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export the whole account as a JSON snapshot
    pub async fn export_account_json<W: Write>(
        &self,
        user_id: UserId,
        mut writer: W,
    ) -> Result<AccountSnapshot> {
        let user = self.ledger.balance(user_id).await?;
        let transactions = self.ledger.list_transactions(user_id).await?;
        let cards = self.ledger.list_active_cards(user_id).await?;
        let reconciliation = self.ledger.reconcile(user_id).await?;

        let snapshot = AccountSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            user,
            transactions,
            cards: cards.iter().map(MaskedCard::from).collect(),
            reconciliation,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
