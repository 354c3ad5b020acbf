//! DataFetcher: prices and candles across prioritized providers.
//!
//! Each provider is tried in priority order; every call goes through the
//! shared [`FetchPipeline`]. The first success wins. When all providers fail
//! the result is [`FetchError::DataUnavailable`] carrying the last cause.

use super::error::FetchError;
use super::pipeline::{FetchPipeline, FetchRequest};
use super::provider::{Interval, MarketDataProvider, ProviderConfig};
use crate::domain::{Candle, CurrencyPair};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Market data as the signal generator consumes it.
pub trait MarketData: Send + Sync {
    fn current_price(&self, pair: &str) -> Result<f64, FetchError>;

    fn candles(
        &self,
        pair: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError>;
}

pub struct DataFetcher {
    providers: Vec<Arc<dyn MarketDataProvider>>,
    pipeline: FetchPipeline,
}

impl DataFetcher {
    /// Providers are tried in the order given.
    pub fn new(pipeline: FetchPipeline, providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        Self {
            providers,
            pipeline,
        }
    }

    /// Build every enabled provider from config, lowest priority value first.
    ///
    /// Providers that cannot be built (typically a missing API key) are skipped
    /// with a warning.
    pub fn from_config(
        pipeline: FetchPipeline,
        configs: &BTreeMap<String, ProviderConfig>,
    ) -> Self {
        let mut ordered: Vec<(&String, &ProviderConfig)> =
            configs.iter().filter(|(_, c)| c.enabled).collect();
        ordered.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then_with(|| a.0.cmp(b.0)));

        let mut providers: Vec<Arc<dyn MarketDataProvider>> = Vec::new();
        for (name, config) in ordered {
            match config.kind.build(name, config) {
                Ok(p) => {
                    info!(provider = %name, priority = config.priority, "provider enabled");
                    providers.push(Arc::from(p));
                }
                Err(e) => warn!(provider = %name, error = %e, "provider skipped"),
            }
        }
        Self::new(pipeline, providers)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn pipeline(&self) -> &FetchPipeline {
        &self.pipeline
    }

    /// Latest exchange rate.
    pub fn price(&self, pair: &str) -> Result<f64, FetchError> {
        let pair = CurrencyPair::parse(pair)?;
        let params = json!({ "pair": pair.code() });
        self.first_success(&pair, "price", |provider| {
            self.pipeline.execute(
                FetchRequest {
                    provider: provider.name(),
                    endpoint: "price",
                    params: &params,
                    ttl: None,
                },
                || provider.fetch_price(&pair),
            )
        })
    }

    /// Most recent `limit` candles, oldest first.
    pub fn ohlc(
        &self,
        pair: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let pair = CurrencyPair::parse(pair)?;
        let params = json!({ "pair": pair.code(), "interval": interval.as_str(), "limit": limit });
        self.first_success(&pair, "ohlc", |provider| {
            self.pipeline.execute(
                FetchRequest {
                    provider: provider.name(),
                    endpoint: "ohlc",
                    params: &params,
                    ttl: None,
                },
                || provider.fetch_ohlc(&pair, interval, limit),
            )
        })
    }

    /// [`price`](Self::price), with failures collapsed to `None`.
    pub fn get_price(&self, pair: &str) -> Option<f64> {
        self.price(pair).ok()
    }

    /// [`ohlc`](Self::ohlc), with failures collapsed to `None`.
    pub fn get_ohlc(&self, pair: &str, interval: Interval, limit: usize) -> Option<Vec<Candle>> {
        self.ohlc(pair, interval, limit).ok()
    }

    fn first_success<T>(
        &self,
        pair: &CurrencyPair,
        what: &str,
        mut attempt: impl FnMut(&dyn MarketDataProvider) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let mut last_error: Option<FetchError> = None;
        for provider in &self.providers {
            match attempt(provider.as_ref()) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(provider = provider.name(), %pair, what, error = %e, "provider failed");
                    last_error = Some(e);
                }
            }
        }
        let cause = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no providers configured".into());
        Err(FetchError::DataUnavailable(format!("{what} for {pair}: {cause}")))
    }
}

impl MarketData for DataFetcher {
    fn current_price(&self, pair: &str) -> Result<f64, FetchError> {
        self.price(pair)
    }

    fn candles(
        &self,
        pair: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.ohlc(pair, interval, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheManager};
    use crate::clock::{Clock, ManualClock};
    use crate::resilience::{
        BreakerRegistry, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig,
        RetryManager,
    };
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeProvider {
        name: &'static str,
        price: Result<f64, FetchError>,
        calls: AtomicU32,
    }

    impl FakeProvider {
        fn new(name: &'static str, price: Result<f64, FetchError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                price,
                calls: AtomicU32::new(0),
            })
        }
    }

    impl MarketDataProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn fetch_price(&self, _pair: &CurrencyPair) -> Result<f64, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.price.clone()
        }

        fn fetch_ohlc(
            &self,
            _pair: &CurrencyPair,
            _interval: Interval,
            limit: usize,
        ) -> Result<Vec<Candle>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
            Ok((0..limit)
                .map(|i| Candle {
                    timestamp: start + chrono::Duration::hours(4 * i as i64),
                    open: 1.09,
                    high: 1.10,
                    low: 1.08,
                    close: 1.095,
                })
                .collect())
        }
    }

    fn chain(providers: &[&Arc<FakeProvider>]) -> Vec<Arc<dyn MarketDataProvider>> {
        providers
            .iter()
            .map(|p| Arc::clone(*p) as Arc<dyn MarketDataProvider>)
            .collect()
    }

    fn pipeline() -> FetchPipeline {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ));
        let retry = RetryConfig {
            max_attempts: 1,
            jitter: false,
            ..RetryConfig::default()
        };
        FetchPipeline::new(
            Arc::new(RateLimiter::new(RateLimiterConfig::default(), clock.clone())),
            Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default(), clock.clone())),
            Arc::new(CacheManager::new(CacheConfig::default(), None, clock.clone())),
            Arc::new(RetryManager::new(retry, clock)),
        )
    }

    #[test]
    fn falls_through_to_next_provider() {
        let first = FakeProvider::new("first", Err(FetchError::Server { status: 502 }));
        let second = FakeProvider::new("second", Ok(1.0852));
        let fetcher = DataFetcher::new(pipeline(), chain(&[&first, &second]));
        assert_eq!(fetcher.price("EUR/USD"), Ok(1.0852));
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn first_success_stops_the_search() {
        let first = FakeProvider::new("first", Ok(1.25));
        let second = FakeProvider::new("second", Ok(9.99));
        let fetcher = DataFetcher::new(pipeline(), chain(&[&first, &second]));
        assert_eq!(fetcher.get_price("GBPUSD"), Some(1.25));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn all_failing_is_data_unavailable() {
        let only = FakeProvider::new("only", Err(FetchError::Authentication("bad key".into())));
        let fetcher = DataFetcher::new(pipeline(), chain(&[&only]));
        match fetcher.price("USDJPY") {
            Err(FetchError::DataUnavailable(msg)) => assert!(msg.contains("bad key")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(fetcher.get_price("USDJPY"), None);
    }

    #[test]
    fn no_providers_is_data_unavailable() {
        let fetcher = DataFetcher::new(pipeline(), Vec::new());
        assert!(matches!(
            fetcher.price("EURUSD"),
            Err(FetchError::DataUnavailable(_))
        ));
    }

    #[test]
    fn invalid_pair_rejected_before_any_call() {
        let p = FakeProvider::new("p", Ok(1.0));
        let fetcher = DataFetcher::new(pipeline(), chain(&[&p]));
        assert!(matches!(fetcher.price("EURO"), Err(FetchError::InvalidPair(_))));
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn ohlc_is_cached_per_interval_and_limit() {
        let p = FakeProvider::new("p", Ok(1.0));
        let fetcher = DataFetcher::new(pipeline(), chain(&[&p]));
        assert_eq!(fetcher.get_ohlc("EURUSD", Interval::H4, 3).map(|c| c.len()), Some(3));
        assert_eq!(fetcher.get_ohlc("EURUSD", Interval::H4, 3).map(|c| c.len()), Some(3));
        assert_eq!(p.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.get_ohlc("EURUSD", Interval::H1, 3).map(|c| c.len()), Some(3));
        assert_eq!(p.calls.load(Ordering::SeqCst), 2);
    }
}
