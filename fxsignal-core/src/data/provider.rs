//! Market data provider trait and the provider registry.
//!
//! The MarketDataProvider trait abstracts over quote sources (Alpha Vantage,
//! Twelve Data) so the fetcher can fall through them in priority order and
//! tests can substitute fakes. Providers know nothing about rate limits,
//! breakers or the cache; the fetch pipeline wraps them.

use super::alpha_vantage::AlphaVantageProvider;
use super::error::FetchError;
use super::twelve_data::TwelveDataProvider;
use crate::domain::{Candle, CurrencyPair};
use crate::resilience::RateLimitRule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "30min")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1day")]
    D1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::M30 => "30min",
            Interval::H1 => "1h",
            Interval::H4 => "4h",
            Interval::D1 => "1day",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Interval::M30 => Duration::from_secs(30 * 60),
            Interval::H1 => Duration::from_secs(3600),
            Interval::H4 => Duration::from_secs(4 * 3600),
            Interval::D1 => Duration::from_secs(86_400),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trait for quote sources.
pub trait MarketDataProvider: Send + Sync {
    /// Stable name; also the key for rate limits, breakers and cache entries.
    fn name(&self) -> &str;

    /// Latest exchange rate for `pair`.
    fn fetch_price(&self, pair: &CurrencyPair) -> Result<f64, FetchError>;

    /// Most recent `limit` candles, oldest first.
    fn fetch_ohlc(
        &self,
        pair: &CurrencyPair,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;
}

/// Concrete provider implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    AlphaVantage,
    TwelveData,
}

impl ProviderKind {
    pub fn default_name(&self) -> &'static str {
        match self {
            ProviderKind::AlphaVantage => "alpha_vantage",
            ProviderKind::TwelveData => "twelve_data",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderKind::AlphaVantage => "ALPHA_VANTAGE_API_KEY",
            ProviderKind::TwelveData => "TWELVE_DATA_API_KEY",
        }
    }

    /// Instantiate the provider. The API key is read from the configured env var.
    pub fn build(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Box<dyn MarketDataProvider>, FetchError> {
        let env_var = config
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.default_api_key_env().to_string());
        let api_key = std::env::var(&env_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FetchError::Authentication(format!("{env_var} is not set")))?;
        let timeout = Duration::from_secs(config.timeout_secs);

        Ok(match self {
            ProviderKind::AlphaVantage => Box::new(AlphaVantageProvider::new(
                name,
                api_key,
                config.base_url.clone(),
                timeout,
            )?),
            ProviderKind::TwelveData => Box::new(TwelveDataProvider::new(
                name,
                api_key,
                config.base_url.clone(),
                timeout,
            )?),
        })
    }
}

/// `[providers.<name>]` config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower is tried first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Replaces the `[rate_limiter]` defaults for this provider when non-empty.
    #[serde(default)]
    pub rate_limits: Vec<RateLimitRule>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, priority: u32) -> Self {
        Self {
            kind,
            enabled: true,
            priority,
            api_key_env: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            rate_limits: Vec::new(),
        }
    }
}

/// Map `Retry-After` and status onto a [`FetchError`] for a non-success response.
pub(crate) fn check_status(resp: &reqwest::blocking::Response) -> Result<(), FetchError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    Err(FetchError::from_status(status.as_u16(), retry_after))
}

/// Blocking HTTP client shared by the providers.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::blocking::Client, FetchError> {
    reqwest::blocking::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("fxsignal/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))
}

/// Parse a decimal quote string as the providers send them.
pub(crate) fn parse_price(raw: &str, what: &str) -> Result<f64, FetchError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| FetchError::ResponseFormat(format!("{what} is not a number: '{raw}'")))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(FetchError::ResponseFormat(format!("{what} out of range: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_serde_names() {
        assert_eq!(serde_json::to_string(&Interval::H4).unwrap(), "\"4h\"");
        let i: Interval = serde_json::from_str("\"1day\"").unwrap();
        assert_eq!(i, Interval::D1);
        assert_eq!(Interval::H4.duration(), Duration::from_secs(14_400));
    }

    #[test]
    fn provider_config_defaults() {
        let cfg: ProviderConfig = toml::from_str("kind = \"twelve_data\"").unwrap();
        assert_eq!(cfg.kind, ProviderKind::TwelveData);
        assert!(cfg.enabled);
        assert_eq!(cfg.priority, 0);
        assert_eq!(cfg.timeout_secs, 30);
        assert!(cfg.rate_limits.is_empty());
    }

    #[test]
    fn provider_rate_rules_from_toml() {
        let cfg: ProviderConfig = toml::from_str(
            r#"
            kind = "alpha_vantage"
            priority = 2
            rate_limits = [
                { kind = "minute", limit = 75 },
                { kind = "daily", limit = 5000 },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.rate_limits.len(), 2);
        assert_eq!(cfg.rate_limits[0].limit, 75);
    }

    #[test]
    fn build_without_api_key_fails() {
        let cfg = ProviderConfig {
            api_key_env: Some("FXSIGNAL_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..ProviderConfig::new(ProviderKind::AlphaVantage, 0)
        };
        let err = ProviderKind::AlphaVantage.build("alpha_vantage", &cfg).err().unwrap();
        assert!(matches!(err, FetchError::Authentication(_)));
    }

    #[test]
    fn parse_price_rejects_garbage() {
        assert_eq!(parse_price(" 1.0850 ", "rate").unwrap(), 1.085);
        assert!(parse_price("abc", "rate").is_err());
        assert!(parse_price("0", "rate").is_err());
        assert!(parse_price("-1.2", "rate").is_err());
    }
}
