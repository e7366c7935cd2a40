use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{RateError, RateProvider};

/// A static rate table, for offline use.
#[derive(Debug, Clone, Default)]
pub struct FixedRates {
    rates: HashMap<(String, String), Decimal>,
}

impl FixedRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate(mut self, base: &str, quote: &str, rate: Decimal) -> Self {
        self.rates
            .insert((base.to_ascii_uppercase(), quote.to_ascii_uppercase()), rate);
        self
    }

    /// Build from `"GYD/USD" = "0.0048"` style entries.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self, RateError> {
        let mut table = Self::new();
        for (pair, value) in pairs {
            let (base, quote) = pair
                .split_once('/')
                .ok_or_else(|| RateError::InvalidRate(format!("bad pair '{}'", pair)))?;
            let rate = Decimal::from_str(value.trim())
                .map_err(|_| RateError::InvalidRate(format!("{} = {}", pair, value)))?;
            if rate <= Decimal::ZERO {
                return Err(RateError::InvalidRate(format!("{} = {}", pair, value)));
            }
            table = table.with_rate(base.trim(), quote.trim(), rate);
        }
        Ok(table)
    }
}

#[async_trait]
impl RateProvider for FixedRates {
    async fn quote(&self, base: &str, quote: &str) -> Result<Decimal, RateError> {
        self.rates
            .get(&(base.to_string(), quote.to_string()))
            .copied()
            .ok_or_else(|| RateError::UnknownPair {
                base: base.to_string(),
                quote: quote.to_string(),
            })
    }
}
