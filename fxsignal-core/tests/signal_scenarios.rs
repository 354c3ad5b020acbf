//! End-to-end signal generation: analyzers, market data through the full
//! fetch pipeline, and the composite decision.

use chrono::{DateTime, TimeZone, Utc};
use fxsignal_core::cache::{CacheConfig, CacheManager};
use fxsignal_core::clock::{Clock, ManualClock};
use fxsignal_core::data::{
    DataFetcher, FetchError, FetchPipeline, Interval, MarketData, MarketDataProvider,
};
use fxsignal_core::domain::{Action, Axis, Candle, CurrencyPair, SignalComponent, TradingSession};
use fxsignal_core::resilience::{
    BreakerRegistry, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig,
    RetryManager,
};
use fxsignal_core::signal::{
    AnalysisError, Analyzer, AxisWeights, CompositeSignalGenerator, SignalConfig, Snapshot,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// Wednesday, regular session (multiplier 1.0)
fn wednesday() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 11, 0, 0).unwrap()
}

struct Quote(f64);

impl MarketData for Quote {
    fn current_price(&self, _pair: &str) -> Result<f64, FetchError> {
        Ok(self.0)
    }

    fn candles(
        &self,
        _pair: &str,
        _interval: Interval,
        _limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        Err(FetchError::DataUnavailable("not needed".into()))
    }
}

struct Fixed {
    axis: Axis,
    score: f64,
    confidence: f64,
}

impl Analyzer for Fixed {
    fn axis(&self) -> Axis {
        self.axis
    }

    fn analyze(&self, _pair: &CurrencyPair) -> Result<SignalComponent, AnalysisError> {
        Ok(SignalComponent::new(self.axis, self.score, self.confidence, 0.0))
    }
}

fn fixed(axis: Axis, score: f64, confidence: f64) -> Arc<dyn Analyzer> {
    Arc::new(Fixed {
        axis,
        score,
        confidence,
    })
}

fn generator(config: SignalConfig, market: Arc<dyn MarketData>) -> CompositeSignalGenerator {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(wednesday()));
    CompositeSignalGenerator::new(config, market, clock)
}

#[test]
fn scenario_b_weighted_composite_buys() {
    let config = SignalConfig {
        weights: AxisWeights {
            technical: 0.6,
            economic: 0.4,
            sentiment: 0.0,
            geopolitical: 0.0,
        },
        ..SignalConfig::default()
    };
    let g = generator(config, Arc::new(Quote(1.0850)))
        .with_analyzer(fixed(Axis::Technical, 0.8, 0.9))
        .with_analyzer(fixed(Axis::Economic, 0.4, 0.7));

    let s = g.generate_signal("EURUSD");

    let expected = (0.8 * 0.6 * 0.9 + 0.4 * 0.4 * 0.7) / (0.6 * 0.9 + 0.4 * 0.7);
    assert!((s.signal_strength - expected).abs() < 1e-9);
    assert!((s.signal_strength - 0.656).abs() < 1e-3);
    assert_eq!(s.session, TradingSession::Regular);
    assert_eq!(s.session_multiplier, 1.0);
    assert_eq!(s.action, Action::Buy);
    assert!(!s.fallback);
    assert!(s.exit_price.unwrap() > s.entry_price.unwrap());
    assert!(s.stop_loss.unwrap() < s.entry_price.unwrap());
    assert_eq!(s.days_to_target, Some(3));
    assert_eq!(s.expires_at, wednesday() + chrono::Duration::days(2));
}

#[test]
fn scenario_c_zero_confidence_holds() {
    let config = SignalConfig {
        weights: AxisWeights {
            technical: 0.4,
            economic: 0.3,
            sentiment: 0.1,
            geopolitical: 0.2,
        },
        ..SignalConfig::default()
    };
    let mut g = generator(config, Arc::new(Quote(1.2650)));
    for axis in Axis::ALL {
        g = g.with_analyzer(fixed(axis, 0.9, 0.0));
    }

    let s = g.generate_signal("GBPUSD");

    assert_eq!(s.components.len(), 4);
    assert_eq!(s.confidence, 0.0);
    assert_eq!(s.action, Action::Hold);
    assert!(s.entry_price.is_none() && s.exit_price.is_none() && s.stop_loss.is_none());
    assert!(s.error.is_none());
}

#[test]
fn weekend_session_damps_strength() {
    // |score| 0.4 × confidence 0.8 = 0.32 clears strong on a weekday; the 0.5
    // weekend multiplier leaves 0.16, a medium signal
    let clock: Arc<dyn Clock> =
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 9, 11, 0, 0).unwrap()));
    let g = CompositeSignalGenerator::new(SignalConfig::default(), Arc::new(Quote(0.6550)), clock)
        .with_analyzer(fixed(Axis::Technical, -0.4, 0.6))
        .with_analyzer(fixed(Axis::Economic, -0.4, 0.6))
        .with_analyzer(fixed(Axis::Geopolitical, -0.4, 0.6));

    let s = g.generate_signal("AUDUSD");
    assert_eq!(s.session, TradingSession::Weekend);
    assert_eq!(s.action, Action::Sell);
    assert_eq!(s.tier, Some(fxsignal_core::domain::SignalTier::Medium));
    assert_eq!(s.target_pips, Some(150.0));
}

// ── Full stack: snapshot analyzers + data fetcher + pipeline ─────────

struct CountingProvider {
    calls: AtomicU32,
}

impl MarketDataProvider for CountingProvider {
    fn name(&self) -> &str {
        "twelve_data"
    }

    fn fetch_price(&self, pair: &CurrencyPair) -> Result<f64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match pair.code().as_str() {
            "USDJPY" => Ok(151.20),
            _ => Ok(1.0850),
        }
    }

    fn fetch_ohlc(
        &self,
        _pair: &CurrencyPair,
        _interval: Interval,
        _limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Unsupported {
            provider: "twelve_data".into(),
            what: "candles in this test".into(),
        })
    }
}

const SNAPSHOT: &str = r#"{
    "EURUSD": {
        "technical": {"score": 0.7, "confidence": 0.8, "details": {"average_weekly_range": 0.0180}},
        "economic": {"score": 0.3, "confidence": 0.6}
    },
    "USDJPY": {
        "technical": {"score": -0.6, "confidence": 0.7},
        "economic": {"score": -0.5, "confidence": 0.6},
        "geopolitical": {"score": -0.2, "confidence": 0.5}
    }
}"#;

#[test]
fn snapshot_analyzers_through_fetch_pipeline() {
    let manual = Arc::new(ManualClock::new(wednesday()));
    let clock: Arc<dyn Clock> = manual.clone();
    let retry = RetryConfig {
        jitter: false,
        ..RetryConfig::default()
    };
    let pipeline = FetchPipeline::new(
        Arc::new(RateLimiter::new(RateLimiterConfig::default(), clock.clone())),
        Arc::new(BreakerRegistry::new(CircuitBreakerConfig::default(), clock.clone())),
        Arc::new(CacheManager::new(CacheConfig::default(), None, clock.clone())),
        Arc::new(RetryManager::new(retry, clock.clone())),
    );
    let provider = Arc::new(CountingProvider {
        calls: AtomicU32::new(0),
    });
    let fetcher = Arc::new(DataFetcher::new(
        pipeline.clone(),
        vec![provider.clone() as Arc<dyn MarketDataProvider>],
    ));

    let mut g = CompositeSignalGenerator::new(SignalConfig::default(), fetcher, clock);
    for analyzer in Snapshot::from_json(SNAPSHOT).unwrap().analyzers() {
        g = g.with_analyzer(Arc::new(analyzer));
    }

    let signals = g.generate_signals(&["EURUSD", "USDJPY", "NZDUSD"]);
    assert_eq!(signals.len(), 3);

    let eur = &signals["EURUSD"];
    assert_eq!(eur.action, Action::Buy);
    assert_eq!(eur.entry_price, Some(1.0850));
    assert!(eur.components[&Axis::Geopolitical].is_failed());
    assert!(eur.achievement_probability > 0.0);

    let jpy = &signals["USDJPY"];
    assert_eq!(jpy.action, Action::Sell);
    assert!(jpy.exit_price.unwrap() < 151.20 && jpy.stop_loss.unwrap() > 151.20);

    // no snapshot entries at all for NZDUSD
    let nzd = &signals["NZDUSD"];
    assert!(nzd.is_error());
    assert_eq!(nzd.action, Action::Hold);

    // one price call per directional pair plus one candle attempt for USDJPY,
    // which has no reported weekly range; alpha budget untouched
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    assert_eq!(pipeline.limiter().usage("twelve_data").minute_calls, 3);

    // the same prices come from cache the second time round
    let again = g.generate_signals(&["EURUSD", "USDJPY"]);
    assert_eq!(again["EURUSD"].entry_price, Some(1.0850));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    assert!(manual.sleeps().is_empty());
}
