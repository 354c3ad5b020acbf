//! Ordered middleware around one upstream call.
//!
//! The layers run in a fixed order:
//!
//! 1. rate limiter: wait until the provider has budget (nothing consumed yet)
//! 2. circuit breaker: fail fast while the provider is unhealthy
//! 3. cache: serve a fresh stored response without touching the network
//! 4. retry: call upstream with backoff; each attempt consumes rate budget
//!
//! Only upstream outcomes are recorded by the breaker. A cache hit passes
//! its open/closed check but counts as neither success nor failure.
//!
//! Successful upstream responses are written back to the cache.

use super::error::FetchError;
use crate::cache::CacheManager;
use crate::resilience::{BreakerRegistry, RateLimiter, RetryManager};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A single upstream request, identified for caching by endpoint + params.
#[derive(Debug)]
pub struct FetchRequest<'a, P: ?Sized> {
    pub provider: &'a str,
    pub endpoint: &'a str,
    pub params: &'a P,
    /// Overrides the provider's default cache TTL.
    pub ttl: Option<Duration>,
}

/// Shared resilience stack used by every fetch.
#[derive(Clone)]
pub struct FetchPipeline {
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    cache: Arc<CacheManager>,
    retry: Arc<RetryManager>,
}

impl FetchPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        breakers: Arc<BreakerRegistry>,
        cache: Arc<CacheManager>,
        retry: Arc<RetryManager>,
    ) -> Self {
        Self {
            limiter,
            breakers,
            cache,
            retry,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Run `op` through rate limit, breaker, cache and retry, in that order.
    pub fn execute<P, T>(
        &self,
        request: FetchRequest<'_, P>,
        mut op: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError>
    where
        P: Serialize + ?Sized,
        T: Serialize + DeserializeOwned + Clone,
    {
        let FetchRequest {
            provider,
            endpoint,
            params,
            ttl,
        } = request;
        let rules = self.limiter.config().rules_for(provider).to_vec();

        self.limiter.wait_for_capacity(provider, &rules)?;

        let breaker = self.breakers.get(provider);
        breaker.check()?;

        // a hit is not a breaker outcome
        let cached = self.cache.get_cached_api_response::<P, T>(provider, endpoint, params);
        if let Some(hit) = cached {
            debug!(provider, endpoint, "served from cache");
            return Ok(hit);
        }

        breaker.call(|| {
            let value = self.retry.run(|attempt| {
                self.limiter.acquire(provider, &rules)?;
                debug!(provider, endpoint, attempt, "upstream request");
                op()
            })?;

            self.cache.cache_api_response(provider, endpoint, params, &value, ttl);
            Ok(value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::clock::{Clock, ManualClock};
    use crate::resilience::{
        BreakerState, CircuitBreakerConfig, LimitKind, RateLimitRule, RateLimiterConfig,
        RetryConfig,
    };
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::cell::Cell;

    fn pipeline(clock: Arc<ManualClock>) -> FetchPipeline {
        let c: Arc<dyn Clock> = clock;
        let mut limits = RateLimiterConfig::default();
        limits
            .limits
            .insert("test".into(), vec![RateLimitRule::new(LimitKind::Minute, 100)]);
        let retry = RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        };
        FetchPipeline::new(
            Arc::new(RateLimiter::new(limits, c.clone())),
            Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default(), c.clone())),
            Arc::new(CacheManager::new(CacheConfig::default(), None, c.clone())),
            Arc::new(RetryManager::new(retry, c)),
        )
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ))
    }

    fn request<'a>(params: &'a serde_json::Value) -> FetchRequest<'a, serde_json::Value> {
        FetchRequest {
            provider: "test",
            endpoint: "price",
            params,
            ttl: None,
        }
    }

    #[test]
    fn second_call_served_from_cache() {
        let p = pipeline(clock());
        let params = json!({"pair": "EURUSD"});
        let calls = Cell::new(0);
        let op = || {
            calls.set(calls.get() + 1);
            Ok(1.0850_f64)
        };
        assert_eq!(p.execute(request(&params), op), Ok(1.0850));
        assert_eq!(p.execute(request(&params), op), Ok(1.0850));
        assert_eq!(calls.get(), 1);
        assert_eq!(p.limiter().usage("test").minute_calls, 1);
    }

    #[test]
    fn retries_count_against_rate_budget() {
        let p = pipeline(clock());
        let params = json!({"pair": "EURUSD"});
        let calls = Cell::new(0);
        let result = p.execute(request(&params), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(FetchError::Server { status: 503 })
            } else {
                Ok(1.0_f64)
            }
        });
        assert_eq!(result, Ok(1.0));
        assert_eq!(p.limiter().usage("test").minute_calls, 3);
        assert_eq!(p.breakers().get("test").stats().successes, 1);
    }

    #[test]
    fn open_breaker_short_circuits() {
        let p = pipeline(clock());
        p.breakers().get("test").force_open();
        let params = json!({});
        let result: Result<f64, _> = p.execute(request(&params), || panic!("must not be called"));
        assert_eq!(result, Err(FetchError::CircuitOpen { provider: "test".into() }));
    }

    #[test]
    fn exhausted_retries_count_once_against_breaker() {
        let p = pipeline(clock());
        let params = json!({});
        let result: Result<f64, _> =
            p.execute(request(&params), || Err(FetchError::Timeout("slow".into())));
        assert!(matches!(result, Err(FetchError::Timeout(_))));
        let stats = p.breakers().get("test").stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.state, BreakerState::Closed);
    }
}
