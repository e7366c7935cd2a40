use chrono::{DateTime, Months, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use super::{Cents, UserId};

pub type CardId = i64;

/// Total digits in a generated card number, prefix and check digit included.
pub const CARD_NUMBER_LEN: usize = 16;

/// Network prefix used when none is configured.
pub const DEFAULT_CARD_PREFIX: &str = "4532";

/// A single-use spend instrument loaded from the wallet balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualCard {
    pub id: CardId,
    pub user_id: UserId,
    pub card_number: String,
    /// MM/YY
    pub expiry_date: String,
    pub cvv: String,
    /// Value loaded at issuance; not a running balance
    pub amount: Cents,
    pub currency: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl VirtualCard {
    pub fn last4(&self) -> &str {
        last4(&self.card_number)
    }
}

/// A card about to be inserted together with its debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVirtualCard {
    pub user_id: UserId,
    pub details: CardDetails,
    pub amount: Cents,
    pub currency: String,
}

/// Number, expiry and CVV for a card that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub card_number: String,
    pub expiry_date: String,
    pub cvv: String,
}

/// Source of card details. Uniqueness is not its job: the store rejects
/// collisions and the ledger asks for a fresh number.
pub trait CardGenerator: Send + Sync {
    fn generate(&self, issued_at: DateTime<Utc>) -> CardDetails;
}

/// Generates Luhn-valid card numbers from the operating system CSPRNG.
#[derive(Debug, Clone)]
pub struct SecureCardGenerator {
    prefix: String,
}

impl SecureCardGenerator {
    /// `prefix` must be all digits and shorter than the card number.
    pub fn new(prefix: impl Into<String>) -> Result<Self, String> {
        let prefix = prefix.into();
        if prefix.is_empty()
            || prefix.len() >= CARD_NUMBER_LEN
            || !prefix.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(format!("invalid card prefix '{}'", prefix));
        }
        Ok(Self { prefix })
    }
}

impl Default for SecureCardGenerator {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_CARD_PREFIX.to_string(),
        }
    }
}

impl CardGenerator for SecureCardGenerator {
    fn generate(&self, issued_at: DateTime<Utc>) -> CardDetails {
        let mut rng = OsRng;

        let mut body = self.prefix.clone();
        while body.len() < CARD_NUMBER_LEN - 1 {
            let digit: u8 = rng.gen_range(0..10);
            body.push(char::from(b'0' + digit));
        }
        let check = luhn_check_digit(&body);
        body.push(char::from(b'0' + check));

        CardDetails {
            card_number: body,
            expiry_date: expiry_for(issued_at),
            cvv: format!("{:03}", rng.gen_range(0..1000u16)),
        }
    }
}

/// Expiry one year after issuance, formatted MM/YY.
pub fn expiry_for(issued_at: DateTime<Utc>) -> String {
    issued_at
        .checked_add_months(Months::new(12))
        .unwrap_or(issued_at)
        .format("%m/%y")
        .to_string()
}

/// Check digit that makes `payload` + digit pass the Luhn test.
pub fn luhn_check_digit(payload: &str) -> u8 {
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    ((10 - (sum % 10)) % 10) as u8
}

pub fn luhn_valid(number: &str) -> bool {
    match number.len().checked_sub(1) {
        Some(split) if number.bytes().all(|b| b.is_ascii_digit()) && split > 0 => {
            let (payload, check) = number.split_at(split);
            luhn_check_digit(payload) == check.as_bytes()[0] - b'0'
        }
        _ => false,
    }
}

pub fn last4(card_number: &str) -> &str {
    let start = card_number.len().saturating_sub(4);
    &card_number[start..]
}
