use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{RateError, RateProvider};

pub const DEFAULT_CURRENCY_API_URL: &str = "https://api.currencyapi.com/v3";

/// Quotes from currencyapi.com's `latest` endpoint.
pub struct CurrencyApiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct LatestResponse {
    data: HashMap<String, QuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    value: serde_json::Number,
}

impl CurrencyApiProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RateError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl RateProvider for CurrencyApiProvider {
    async fn quote(&self, base: &str, quote: &str) -> Result<Decimal, RateError> {
        let response = self
            .client
            .get(format!("{}/latest", self.base_url))
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("base_currency", base),
                ("currencies", quote),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RateError::Status(response.status()));
        }

        let body = response.text().await?;
        parse_latest(&body, quote)
    }
}

/// Extract `data.<quote>.value` from a `latest` response body.
///
/// `serde_json` is built with `arbitrary_precision`, so the number keeps the
/// digits the API sent and is parsed straight into a `Decimal`.
pub fn parse_latest(body: &str, quote: &str) -> Result<Decimal, RateError> {
    let parsed: LatestResponse =
        serde_json::from_str(body).map_err(|e| RateError::InvalidRate(e.to_string()))?;

    let entry = parsed
        .data
        .get(quote)
        .ok_or_else(|| RateError::MissingQuote(quote.to_string()))?;

    let raw = entry.value.to_string();
    let rate = Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| RateError::InvalidRate(raw.clone()))?;

    if rate <= Decimal::ZERO {
        return Err(RateError::InvalidRate(raw));
    }
    Ok(rate)
}
