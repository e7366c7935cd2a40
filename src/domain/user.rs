use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Cents;

pub type UserId = i64;

/// Home currency assigned to new users unless configured otherwise.
pub const DEFAULT_CURRENCY: &str = "GYD";

/// A wallet holder. The balance is held in a single home currency and only
/// changes through the account ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Argon2id PHC string; the plaintext credential is never stored
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Balance in cents, never negative
    pub balance: Cents,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// A user about to be inserted. The store assigns the id and timestamp and
/// always starts the balance at zero.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub currency: String,
}
