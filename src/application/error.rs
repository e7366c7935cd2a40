use thiserror::Error;

use crate::domain::Cents;
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Nothing was attempted.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient balance: balance {balance}, required {required}")]
    InsufficientBalance { balance: Cents, required: Cents },

    /// The quote could not be obtained. Nothing was recorded; safe to retry.
    #[error("Exchange rate unavailable: {0}")]
    RateUnavailable(String),

    #[error("Invalid username or password")]
    Unauthorized,

    #[error("Credential processing failed: {0}")]
    Credential(String),

    /// Persistence failed. The unit was rolled back; retry the whole operation.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// True when retrying the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::RateUnavailable(_) | LedgerError::Store(_)
        )
    }
}
