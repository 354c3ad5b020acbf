//! Structured errors for upstream data access.
//!
//! Every failure a provider call can produce maps to an [`ErrorKind`]. The
//! circuit breaker's "expected" set and the retry allow-list are both
//! expressed in kinds, so they can be configured by name in TOML.

use crate::domain::PairError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the fetch pipeline and the providers behind it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("rate limit exceeded for {provider} after waiting {waited_secs}s")]
    RateLimitExceeded { provider: String, waited_secs: u64 },

    #[error("circuit breaker open for {provider}")]
    CircuitOpen { provider: String },

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("network unreachable: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    UpstreamRateLimited { retry_after_secs: u64 },

    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    #[error("authentication required: {0}")]
    Authentication(String),

    #[error("response format changed: {0}")]
    ResponseFormat(String),

    #[error("invalid currency pair: {0}")]
    InvalidPair(String),

    #[error("{provider} does not support {what}")]
    Unsupported { provider: String, what: String },
}

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimitExceeded,
    CircuitOpen,
    DataUnavailable,
    Network,
    Timeout,
    UpstreamRateLimited,
    Server,
    Authentication,
    ResponseFormat,
    InvalidPair,
    Unsupported,
}

impl ErrorKind {
    /// Transient transport failures: what breakers count and retries repeat by default.
    pub fn transient() -> Vec<ErrorKind> {
        vec![
            ErrorKind::Network,
            ErrorKind::Timeout,
            ErrorKind::Server,
            ErrorKind::UpstreamRateLimited,
        ]
    }
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            FetchError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            FetchError::DataUnavailable(_) => ErrorKind::DataUnavailable,
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            FetchError::Server { .. } => ErrorKind::Server,
            FetchError::Authentication(_) => ErrorKind::Authentication,
            FetchError::ResponseFormat(_) => ErrorKind::ResponseFormat,
            FetchError::InvalidPair(_) => ErrorKind::InvalidPair,
            FetchError::Unsupported { .. } => ErrorKind::Unsupported,
        }
    }

    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: u16, retry_after_secs: Option<u64>) -> Self {
        match status {
            401 | 403 => FetchError::Authentication(format!("HTTP {status}")),
            408 => FetchError::Timeout(format!("HTTP {status}")),
            429 => FetchError::UpstreamRateLimited {
                retry_after_secs: retry_after_secs.unwrap_or(60),
            },
            500..=599 => FetchError::Server { status },
            _ => FetchError::ResponseFormat(format!("unexpected HTTP {status}")),
        }
    }
}

impl From<PairError> for FetchError {
    fn from(e: PairError) -> Self {
        FetchError::InvalidPair(e.0)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_decode() {
            FetchError::ResponseFormat(e.to_string())
        } else if let Some(status) = e.status() {
            FetchError::from_status(status.as_u16(), None)
        } else {
            FetchError::Network(e.to_string())
        }
    }
}
