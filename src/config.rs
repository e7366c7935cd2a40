//! Application configuration.
//!
//! Sources, later ones winning: built-in defaults, `cambio.toml` (or the file
//! given with `--config`), then `CAMBIO__SECTION__KEY` environment variables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::application::LedgerSettings;
use crate::domain::{DEFAULT_CARD_PREFIX, DEFAULT_CURRENCY, SecureCardGenerator, parse_currency};
use crate::rates::{CurrencyApiProvider, DEFAULT_CURRENCY_API_URL, FixedRates, RateProvider};
use crate::storage::SqliteOptions;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub rates: RatesConfig,
    pub ledger: LedgerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: String,
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "cambio.db".to_string(),
            max_connections: 5,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    CurrencyApi,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatesConfig {
    pub source: RateSource,
    pub api_url: String,
    /// Falls back to the `CURRENCY_API_KEY` environment variable
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// `"GYD/USD" = "0.0048"` entries for the fixed source
    pub fixed: HashMap<String, String>,
}

impl Default for RatesConfig {
    fn default() -> Self {
        Self {
            source: RateSource::CurrencyApi,
            api_url: DEFAULT_CURRENCY_API_URL.to_string(),
            api_key: None,
            timeout_secs: 10,
            fixed: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub default_currency: String,
    pub card_prefix: String,
    pub balance_attempts: u32,
    pub card_number_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_currency: DEFAULT_CURRENCY.to_string(),
            card_prefix: DEFAULT_CARD_PREFIX.to_string(),
            balance_attempts: 3,
            card_number_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "cambio=info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional file plus the environment.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name("cambio").required(false),
        };

        Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("CAMBIO").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from a TOML string, without consulting the environment.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            max_connections: self.database.max_connections.max(1),
            busy_timeout: Duration::from_millis(self.database.busy_timeout_ms),
        }
    }

    pub fn ledger_settings(&self) -> Result<LedgerSettings> {
        let default_currency = parse_currency(&self.ledger.default_currency)
            .context("Invalid ledger.default_currency")?;
        Ok(LedgerSettings {
            default_currency,
            rate_timeout: Duration::from_secs(self.rates.timeout_secs),
            balance_attempts: self.ledger.balance_attempts.max(1),
            card_number_attempts: self.ledger.card_number_attempts.max(1),
        })
    }

    pub fn card_generator(&self) -> Result<SecureCardGenerator> {
        SecureCardGenerator::new(self.ledger.card_prefix.clone()).map_err(anyhow::Error::msg)
    }

    pub fn rate_provider(&self) -> Result<Arc<dyn RateProvider>> {
        match self.rates.source {
            RateSource::Fixed => {
                let table = FixedRates::from_pairs(&self.rates.fixed)
                    .context("Invalid fixed rate table")?;
                Ok(Arc::new(table))
            }
            RateSource::CurrencyApi => {
                let api_key = self
                    .rates
                    .api_key
                    .clone()
                    .or_else(|| std::env::var("CURRENCY_API_KEY").ok())
                    .context("No currency API key: set rates.api_key or CURRENCY_API_KEY")?;
                let provider = CurrencyApiProvider::new(
                    self.rates.api_url.clone(),
                    api_key,
                    Duration::from_secs(self.rates.timeout_secs),
                )
                .context("Failed to build rate client")?;
                Ok(Arc::new(provider))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.database.path, "cambio.db");
        assert_eq!(config.rates.source, RateSource::CurrencyApi);
        assert_eq!(config.ledger.default_currency, "GYD");
        assert_eq!(config.ledger.card_prefix, "4532");

        let settings = config.ledger_settings().unwrap();
        assert_eq!(settings.rate_timeout, Duration::from_secs(10));
        assert_eq!(settings.card_number_attempts, 5);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            path = "/tmp/wallet.db"

            [rates]
            timeout_secs = 3

            [ledger]
            default_currency = "usd"
            card_prefix = "5105"
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, "/tmp/wallet.db");
        assert_eq!(config.database.max_connections, 5);
        let settings = config.ledger_settings().unwrap();
        assert_eq!(settings.default_currency, "USD");
        assert_eq!(settings.rate_timeout, Duration::from_secs(3));
        assert!(config.card_generator().is_ok());
    }

    #[tokio::test]
    async fn test_fixed_rate_source() {
        let config = AppConfig::from_toml(
            r#"
            [rates]
            source = "fixed"

            [rates.fixed]
            "GYD/USD" = "0.0048"
            "#,
        )
        .unwrap();

        let provider = config.rate_provider().unwrap();
        assert_eq!(provider.quote("GYD", "USD").await.unwrap(), dec!(0.0048));
    }

    #[test]
    fn test_bad_default_currency() {
        let config = AppConfig::from_toml("[ledger]\ndefault_currency = \"dollars\"").unwrap();
        let err = config.ledger_settings().unwrap_err();
        assert!(format!("{:#}", err).contains("dollars"));
    }

    #[test]
    fn test_bad_card_prefix() {
        let config = AppConfig::from_toml("[ledger]\ncard_prefix = \"VISA\"").unwrap();
        assert!(config.card_generator().is_err());
    }
}
