//! Wiring: config → resilience stack → data fetcher → signal generator.

use anyhow::{Context, Result};
use fxsignal_core::cache::{CacheManager, RedisStore, RemoteStore};
use fxsignal_core::clock::{Clock, SystemClock};
use fxsignal_core::config::AppConfig;
use fxsignal_core::data::{DataFetcher, FetchPipeline};
use fxsignal_core::resilience::{BreakerRegistry, RateLimiter, RetryManager, UsageStore};
use fxsignal_core::signal::{CompositeSignalGenerator, Snapshot};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything a command needs, built once from config.
pub struct SignalService {
    pub config: AppConfig,
    pub clock: Arc<dyn Clock>,
    pub usage: Arc<UsageStore>,
    pub cache: Arc<CacheManager>,
    pub fetcher: Arc<DataFetcher>,
}

impl SignalService {
    pub fn build(config: AppConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let usage = Arc::new(UsageStore::new(config.usage_dir.clone()));

        let limiter = RateLimiter::new(config.effective_rate_limits(), Arc::clone(&clock))
            .with_usage_store(Arc::clone(&usage));
        let breakers = BreakerRegistry::new(config.circuit_breaker.clone(), Arc::clone(&clock));
        let cache = Arc::new(CacheManager::new(
            config.cache.clone(),
            remote_store(&config)?,
            Arc::clone(&clock),
        ));
        let retry = RetryManager::new(config.retry.clone(), Arc::clone(&clock));

        let pipeline = FetchPipeline::new(
            Arc::new(limiter),
            Arc::new(breakers),
            Arc::clone(&cache),
            Arc::new(retry),
        );
        let fetcher = Arc::new(DataFetcher::from_config(pipeline, &config.providers));
        if fetcher.provider_names().is_empty() {
            warn!("no market data provider available; directional signals will degrade to HOLD");
        }

        Ok(Self {
            config,
            clock,
            usage,
            cache,
            fetcher,
        })
    }

    /// Generator with one analyzer per axis found in the snapshot file.
    pub fn generator(&self, snapshot: Option<&Path>) -> Result<CompositeSignalGenerator> {
        let mut generator = CompositeSignalGenerator::new(
            self.config.signal.clone(),
            self.fetcher.clone(),
            Arc::clone(&self.clock),
        );
        if let Some(path) = snapshot {
            let snapshot = Snapshot::from_file(path)
                .with_context(|| format!("loading component snapshot {}", path.display()))?;
            info!(
                pairs = snapshot.pairs().len(),
                axes = ?snapshot.axes(),
                "component snapshot loaded"
            );
            for analyzer in snapshot.analyzers() {
                generator = generator.with_analyzer(Arc::new(analyzer));
            }
        }
        Ok(generator)
    }
}

fn remote_store(config: &AppConfig) -> Result<Option<Arc<dyn RemoteStore>>> {
    let cache = &config.cache;
    match (&cache.redis_url, cache.enabled) {
        (Some(url), true) => {
            let store = RedisStore::open(url, Duration::from_secs(cache.timeout_secs))
                .with_context(|| format!("invalid redis_url {url}"))?;
            Ok(Some(Arc::new(store)))
        }
        _ => Ok(None),
    }
}
