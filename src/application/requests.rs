use serde::Deserialize;

use crate::domain::{Cents, MAX_AMOUNT_CENTS, parse_cents, parse_currency};

use super::LedgerError;

const MIN_CODE_LEN: usize = 10;
const MAX_CODE_LEN: usize = 20;

/// Body of a prepaid top-up.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AddFundsRequest {
    pub code: String,
    pub amount: String,
}

/// Body of a currency conversion.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConvertRequest {
    pub amount: String,
    pub from_currency: String,
    pub to_currency: String,
}

/// Body of a virtual card issuance.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct IssueCardRequest {
    pub amount: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidTopUp {
    pub code: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidConversion {
    pub amount: Cents,
    pub from_currency: String,
    pub to_currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidCardRequest {
    pub amount: Cents,
    pub currency: String,
}

impl AddFundsRequest {
    pub fn new(code: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            amount: amount.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<ValidTopUp, LedgerError> {
        let code = self.code.trim();
        if code.len() < MIN_CODE_LEN || code.len() > MAX_CODE_LEN {
            return Err(LedgerError::Validation(format!(
                "Prepaid code must be {} to {} characters",
                MIN_CODE_LEN, MAX_CODE_LEN
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(LedgerError::Validation(
                "Prepaid code may only contain letters, digits and '-'".to_string(),
            ));
        }

        Ok(ValidTopUp {
            code: code.to_string(),
            amount: parse_amount(&self.amount)?,
        })
    }
}

impl ConvertRequest {
    pub fn new(
        amount: impl Into<String>,
        from_currency: impl Into<String>,
        to_currency: impl Into<String>,
    ) -> Self {
        Self {
            amount: amount.into(),
            from_currency: from_currency.into(),
            to_currency: to_currency.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<ValidConversion, LedgerError> {
        let amount = parse_amount(&self.amount)?;
        let from_currency = currency(&self.from_currency)?;
        let to_currency = currency(&self.to_currency)?;
        if from_currency == to_currency {
            return Err(LedgerError::Validation(format!(
                "Cannot convert {} to itself",
                from_currency
            )));
        }

        Ok(ValidConversion {
            amount,
            from_currency,
            to_currency,
        })
    }
}

impl IssueCardRequest {
    pub fn new(amount: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            currency: currency.into(),
        }
    }

    pub(crate) fn validate(&self) -> Result<ValidCardRequest, LedgerError> {
        Ok(ValidCardRequest {
            amount: parse_amount(&self.amount)?,
            currency: currency(&self.currency)?,
        })
    }
}

/// A strictly positive amount of at most 2 fractional digits.
pub(crate) fn parse_amount(input: &str) -> Result<Cents, LedgerError> {
    let amount = parse_cents(input)
        .map_err(|e| LedgerError::Validation(format!("Invalid amount '{}': {}", input, e)))?;
    if amount <= 0 {
        return Err(LedgerError::Validation(
            "Amount must be positive".to_string(),
        ));
    }
    if amount > MAX_AMOUNT_CENTS {
        return Err(LedgerError::Validation(format!(
            "Amount exceeds the maximum of {}",
            crate::domain::format_cents(MAX_AMOUNT_CENTS)
        )));
    }
    Ok(amount)
}

fn currency(input: &str) -> Result<String, LedgerError> {
    parse_currency(input).map_err(|e| LedgerError::Validation(e.to_string()))
}

/// `****` plus the last 4 characters of a prepaid code.
pub(crate) fn mask_code(code: &str) -> String {
    let start = code.len().saturating_sub(4);
    format!("****{}", &code[start..])
}
