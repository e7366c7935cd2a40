//! Exchange-rate quoting.
//!
//! The ledger asks for a quote at the moment of every conversion and never
//! caches one. Caching, if any, is a provider concern.

mod currency_api;
mod fixed;

pub use currency_api::*;
pub use fixed::*;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RateError {
    #[error("Rate request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate source answered with status {0}")]
    Status(reqwest::StatusCode),

    #[error("Rate source returned no quote for {0}")]
    MissingQuote(String),

    #[error("Rate source returned an unusable rate: {0}")]
    InvalidRate(String),

    #[error("No rate known for {base}/{quote}")]
    UnknownPair { base: String, quote: String },
}

/// Spot exchange rates between two currency codes.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Units of `quote` currency per one unit of `base` currency.
    async fn quote(&self, base: &str, quote: &str) -> Result<Decimal, RateError>;
}
