//! Application configuration (`fxsignal.toml`).
//!
//! Every section is optional and falls back to its defaults, so an empty file
//! is a valid configuration. API keys never live here: each provider names
//! the environment variable holding its key.

use crate::cache::CacheConfig;
use crate::data::{ProviderConfig, ProviderKind};
use crate::domain::CurrencyPair;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};
use crate::signal::SignalConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pairs generated when none are given on the command line.
    pub pairs: Vec<String>,
    /// Directory holding `usage_YYYY-MM-DD.json` files.
    pub usage_dir: PathBuf,
    pub logging: LoggingConfig,
    pub rate_limiter: RateLimiterConfig,
    pub cache: CacheConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub signal: SignalConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let pairs = ["EURUSD", "GBPUSD", "USDJPY", "USDCHF", "AUDUSD", "USDCAD", "NZDUSD"]
            .into_iter()
            .map(String::from)
            .collect();
        let providers = [ProviderKind::AlphaVantage, ProviderKind::TwelveData]
            .into_iter()
            .enumerate()
            .map(|(i, kind)| (kind.default_name().to_string(), ProviderConfig::new(kind, i as u32)))
            .collect();
        Self {
            pairs,
            usage_dir: PathBuf::from(".fxsignal/usage"),
            logging: LoggingConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            cache: CacheConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            signal: SignalConfig::default(),
            providers,
        }
    }
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rate limits with per-provider overrides applied.
    pub fn effective_rate_limits(&self) -> RateLimiterConfig {
        let mut limiter = self.rate_limiter.clone();
        for (name, provider) in &self.providers {
            if !provider.rate_limits.is_empty() {
                limiter.limits.insert(name.clone(), provider.rate_limits.clone());
            }
        }
        limiter
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for pair in &self.pairs {
            if let Err(e) = CurrencyPair::parse(pair) {
                return invalid(format!("pairs: {e}"));
            }
        }

        self.signal.validate().map_err(ConfigError::Invalid)?;

        let r = &self.retry;
        if r.max_attempts == 0 {
            return invalid("retry.max_attempts must be at least 1".into());
        }
        if !r.exponential_base.is_finite() || r.exponential_base < 1.0 {
            return invalid(format!(
                "retry.exponential_base must be >= 1, got {}",
                r.exponential_base
            ));
        }
        if r.base_delay_ms > r.max_delay_ms {
            return invalid("retry.base_delay_ms exceeds retry.max_delay_ms".into());
        }

        let cb = &self.circuit_breaker;
        if cb.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be at least 1".into());
        }
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 1.0) {
            return invalid(format!(
                "circuit_breaker.failure_rate_threshold must be within (0, 1], got {}",
                cb.failure_rate_threshold
            ));
        }

        let c = &self.cache;
        if c.fallback_max_entries == 0 || c.fallback_evict_batch == 0 {
            return invalid("cache fallback size and eviction batch must be positive".into());
        }

        let limits = self.effective_rate_limits();
        for (provider, rules) in &limits.limits {
            if let Some(rule) = rules.iter().find(|r| r.limit == 0 || r.period().is_zero()) {
                return invalid(format!("rate limit for {provider} is empty: {rule:?}"));
            }
            // one window per kind
            for (i, rule) in rules.iter().enumerate() {
                if rules[..i].iter().any(|r| r.kind == rule.kind) {
                    return invalid(format!(
                        "rate limit for {provider} repeats kind {:?}",
                        rule.kind
                    ));
                }
            }
        }
        if limits.max_sleep_per_poll_secs == 0 {
            return invalid("rate_limiter.max_sleep_per_poll_secs must be positive".into());
        }

        for (name, provider) in &self.providers {
            if provider.timeout_secs == 0 {
                return invalid(format!("providers.{name}.timeout_secs must be positive"));
            }
        }
        Ok(())
    }
}
