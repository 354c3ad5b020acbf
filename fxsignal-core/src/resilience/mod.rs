//! Resilience primitives wrapped around every upstream call.

pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;
pub mod usage;

pub use circuit_breaker::{
    BreakerRegistry, BreakerState, BreakerStats, CircuitBreaker, CircuitBreakerConfig,
};
pub use rate_limit::{LimitKind, RateLimitRule, RateLimiter, RateLimiterConfig, UsageSnapshot};
pub use retry::{RetryConfig, RetryManager};
pub use usage::{UsageError, UsageRecord, UsageStore};
