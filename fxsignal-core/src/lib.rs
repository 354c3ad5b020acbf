//! FXSignal Core: resilient market data access and composite FX signals.
//!
//! This crate contains:
//! - Domain types (currency pairs, candles, signal components, trading signals)
//! - Resilience primitives: rate limiter with persisted daily usage, circuit
//!   breaker registry, retry with backoff
//! - Two-tier response cache (Redis primary, bounded in-process fallback)
//! - Provider adapters and the ordered fetch pipeline in front of them
//! - The composite signal generator (scoring, decision, levels, probability)

pub mod cache;
pub mod clock;
pub mod config;
pub mod data;
pub mod domain;
pub mod resilience;
pub mod signal;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything shared between generation threads is
    /// Send + Sync. The rayon batch path depends on it.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        // Domain types
        require_send::<domain::CurrencyPair>();
        require_sync::<domain::CurrencyPair>();
        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::SignalComponent>();
        require_sync::<domain::SignalComponent>();
        require_send::<domain::TradingSignal>();
        require_sync::<domain::TradingSignal>();

        // Shared services
        require_send::<resilience::RateLimiter>();
        require_sync::<resilience::RateLimiter>();
        require_send::<resilience::BreakerRegistry>();
        require_sync::<resilience::BreakerRegistry>();
        require_send::<resilience::RetryManager>();
        require_sync::<resilience::RetryManager>();
        require_send::<resilience::UsageStore>();
        require_sync::<resilience::UsageStore>();
        require_send::<cache::CacheManager>();
        require_sync::<cache::CacheManager>();
        require_send::<data::FetchPipeline>();
        require_sync::<data::FetchPipeline>();
        require_send::<data::DataFetcher>();
        require_sync::<data::DataFetcher>();
        require_send::<signal::CompositeSignalGenerator>();
        require_sync::<signal::CompositeSignalGenerator>();

        // Errors cross thread boundaries inside signals and logs
        require_send::<data::FetchError>();
        require_sync::<data::FetchError>();
        require_send::<signal::AnalysisError>();
        require_sync::<signal::AnalysisError>();
    }

    /// Architecture contract: analyzers only see the pair.
    ///
    /// Market access, the clock and other components are out of reach, so one
    /// axis never reads another's verdict.
    #[test]
    fn analyzer_trait_takes_only_the_pair() {
        fn _check_trait_object_builds(
            analyzer: &dyn signal::Analyzer,
            pair: &domain::CurrencyPair,
        ) -> Result<domain::SignalComponent, signal::AnalysisError> {
            analyzer.analyze(pair)
        }
    }
}
