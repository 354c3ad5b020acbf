//! Currency pair codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated currency pair such as `EURUSD`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyPair {
    base: String,
    quote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid currency pair '{0}': expected six letters like EURUSD or EUR/USD")]
pub struct PairError(pub String);

impl CurrencyPair {
    /// Parse `EURUSD`, `eurusd`, `EUR/USD` or `EUR_USD`.
    pub fn parse(code: &str) -> Result<Self, PairError> {
        let cleaned: String = code
            .trim()
            .chars()
            .filter(|c| !matches!(c, '/' | '_' | '-'))
            .collect::<String>()
            .to_ascii_uppercase();
        if cleaned.len() != 6 || !cleaned.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PairError(code.to_string()));
        }
        Ok(Self {
            base: cleaned[..3].to_string(),
            quote: cleaned[3..].to_string(),
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn quote(&self) -> &str {
        &self.quote
    }

    /// `EURUSD`
    pub fn code(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// `EUR/USD`
    pub fn slashed(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Pip size: 0.01 for JPY-quoted pairs, 0.0001 otherwise.
    pub fn default_pip_value(&self) -> f64 {
        if self.quote == "JPY" {
            0.01
        } else {
            0.0001
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, self.quote)
    }
}

impl FromStr for CurrencyPair {
    type Err = PairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CurrencyPair {
    type Error = PairError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyPair> for String {
    fn from(pair: CurrencyPair) -> Self {
        pair.code()
    }
}
