//! CompositeSignalGenerator: one trading signal per pair.
//!
//! Per pair the generator:
//! 1. collects a component from every enabled axis (failures become zero
//!    components carrying the error text),
//! 2. combines them into a composite score and confidence,
//! 3. decides BUY/SELL/HOLD against the session-adjusted strength ladder,
//! 4. for directional signals, prices entry/exit/stop from the current rate
//!    and estimates the probability of reaching the target by expiry.
//!
//! `generate_signal` never fails: anything that goes wrong ends up in the
//! returned signal's `error` field.

use super::analyzer::Analyzer;
use super::composite::{combine, Composite};
use super::config::SignalConfig;
use super::decision::{decide, Decision};
use super::probability::{achievement_probability, days_remaining};
use super::targets::{self, AVERAGE_WEEKLY_RANGE};
use super::validate::validate_signal;
use crate::clock::Clock;
use crate::data::{FetchError, Interval, MarketData};
use crate::domain::{Action, Axis, CurrencyPair, SignalComponent, TradingSession, TradingSignal};
use chrono::{DateTime, Datelike, Duration, Utc};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Signals expire at the next Friday.
pub fn next_friday(at: DateTime<Utc>) -> DateTime<Utc> {
    let mut days = 4 - i64::from(at.weekday().num_days_from_monday());
    if days <= 0 {
        days += 7;
    }
    at + Duration::days(days)
}

/// Timing context shared by every signal of one generation call.
#[derive(Debug, Clone, Copy)]
struct Stamp {
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    session: TradingSession,
    multiplier: f64,
}

pub struct CompositeSignalGenerator {
    config: SignalConfig,
    market: Arc<dyn MarketData>,
    clock: Arc<dyn Clock>,
    analyzers: BTreeMap<Axis, Arc<dyn Analyzer>>,
    pool: Option<rayon::ThreadPool>,
}

impl CompositeSignalGenerator {
    pub fn new(config: SignalConfig, market: Arc<dyn MarketData>, clock: Arc<dyn Clock>) -> Self {
        // Build the rayon pool once if more than one pair may run at a time
        let pool = if config.max_parallel_pairs > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_parallel_pairs)
                .build()
            {
                Ok(pool) => Some(pool),
                Err(e) => {
                    warn!(error = %e, "thread pool unavailable, generating sequentially");
                    None
                }
            }
        } else {
            None
        };
        Self {
            config,
            market,
            clock,
            analyzers: BTreeMap::new(),
            pool,
        }
    }

    /// Register the analyzer for its axis, replacing any previous one.
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzers.insert(analyzer.axis(), analyzer);
        self
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn stamp(&self) -> Stamp {
        let now = self.clock.now();
        let (session, multiplier) = self.config.sessions.lookup(now);
        Stamp {
            now,
            expires_at: next_friday(now),
            session,
            multiplier,
        }
    }

    /// Generate the signal for one pair.
    pub fn generate_signal(&self, pair: &str) -> TradingSignal {
        self.generate_at(pair, self.stamp())
    }

    /// Generate signals for many pairs, keyed by normalized pair code.
    ///
    /// Runs on the generator's rayon pool (`max_parallel_pairs` threads)
    /// when there is one and more than one pair is requested.
    pub fn generate_signals<S>(&self, pairs: &[S]) -> BTreeMap<String, TradingSignal>
    where
        S: AsRef<str> + Sync,
    {
        let stamp = self.stamp();

        let signals: Vec<TradingSignal> = match &self.pool {
            Some(pool) if pairs.len() > 1 => pool.install(|| {
                pairs
                    .par_iter()
                    .map(|p| self.generate_at(p.as_ref(), stamp))
                    .collect()
            }),
            _ => pairs.iter().map(|p| self.generate_at(p.as_ref(), stamp)).collect(),
        };

        let directional = signals.iter().filter(|s| s.is_directional()).count();
        info!(pairs = signals.len(), directional, "signals generated");
        signals.into_iter().map(|s| (s.pair.clone(), s)).collect()
    }

    fn generate_at(&self, raw_pair: &str, stamp: Stamp) -> TradingSignal {
        let pair = match CurrencyPair::parse(raw_pair) {
            Ok(p) => p,
            Err(e) => {
                warn!(pair = raw_pair, error = %e, "rejected pair");
                return self.error_signal(raw_pair, stamp, e.to_string(), BTreeMap::new());
            }
        };

        let components = self.collect_components(&pair);
        let usable = components.values().filter(|c| !c.is_failed()).count();
        if usable == 0 {
            let reason = if components.is_empty() {
                "no analysis axis is enabled".to_string()
            } else {
                let failures: Vec<String> = components
                    .values()
                    .map(|c| format!("{}: {}", c.component(), c.error.as_deref().unwrap_or("")))
                    .collect();
                format!("all components failed ({})", failures.join("; "))
            };
            warn!(pair = %pair, %reason, "error signal");
            return self.error_signal(&pair.code(), stamp, reason, components);
        }

        let composite = combine(components.values());
        let decision = decide(
            composite.score,
            composite.confidence,
            stamp.multiplier,
            &self.config.thresholds,
            self.config.confidence_floor,
            &self.config.fallback,
        );

        let mut signal = self.base_signal(&pair, stamp, composite, &decision, components);
        if decision.action != Action::Hold {
            if let Err(e) = self.price_levels(&pair, stamp, composite, &decision, &mut signal) {
                warn!(pair = %pair, error = %e, "directional signal degraded to HOLD");
                let components = std::mem::take(&mut signal.components);
                signal = self.base_signal(&pair, stamp, composite, &decision, components);
                signal.action = Action::Hold;
                signal.tier = None;
                signal.fallback = false;
                signal.reason =
                    Some(format!("{} degraded to HOLD: pricing failed", decision.action));
                signal.error = Some(e.to_string());
            }
        }

        if let Err(e) = validate_signal(&signal) {
            warn!(pair = %pair, error = %e, "signal failed validation");
            let components = std::mem::take(&mut signal.components);
            return self.error_signal(&pair.code(), stamp, e.to_string(), components);
        }

        info!(
            pair = %pair,
            action = %signal.action,
            confidence = signal.confidence,
            strength = signal.signal_strength,
            session = ?signal.session,
            fallback = signal.fallback,
            "signal generated"
        );
        signal
    }

    fn collect_components(&self, pair: &CurrencyPair) -> BTreeMap<Axis, SignalComponent> {
        let mut components = BTreeMap::new();
        for (axis, weight) in self.config.weights.enabled() {
            let component = match self.analyzers.get(&axis) {
                None => SignalComponent::failed(axis, "no analyzer configured"),
                Some(analyzer) => run_analyzer(analyzer.as_ref(), pair),
            };
            if let Some(err) = &component.error {
                warn!(pair = %pair, %axis, error = %err, "component failed");
            } else {
                debug!(
                    pair = %pair,
                    %axis,
                    score = component.score(),
                    confidence = component.confidence(),
                    "component scored"
                );
            }
            components.insert(axis, component.with_weight(weight));
        }
        components
    }

    fn base_signal(
        &self,
        pair: &CurrencyPair,
        stamp: Stamp,
        composite: Composite,
        decision: &Decision,
        components: BTreeMap<Axis, SignalComponent>,
    ) -> TradingSignal {
        let mut signal = TradingSignal::hold(
            pair.code(),
            stamp.now,
            stamp.expires_at,
            stamp.session,
            stamp.multiplier,
        );
        signal.action = decision.action;
        signal.tier = decision.tier;
        signal.fallback = decision.fallback;
        signal.confidence = composite.confidence;
        signal.signal_strength = composite.score;
        signal.components = components;
        signal.reason = Some(decision.reason.clone());
        signal
    }

    fn error_signal(
        &self,
        pair: &str,
        stamp: Stamp,
        error: String,
        components: BTreeMap<Axis, SignalComponent>,
    ) -> TradingSignal {
        let mut signal =
            TradingSignal::error_signal(pair, stamp.now, stamp.expires_at, stamp.session, error);
        signal.session_multiplier = stamp.multiplier;
        signal.components = components;
        signal
    }

    /// Fill entry/exit/stop, target and probability on a directional signal.
    fn price_levels(
        &self,
        pair: &CurrencyPair,
        stamp: Stamp,
        composite: Composite,
        decision: &Decision,
        signal: &mut TradingSignal,
    ) -> Result<(), FetchError> {
        let Some(tier) = decision.tier else {
            return Ok(());
        };
        let price = self.market.current_price(&pair.code()).map_err(|e| match e {
            FetchError::DataUnavailable(_) => e,
            other => FetchError::DataUnavailable(format!("current price for {pair}: {other}")),
        })?;

        let cfg = &self.config.targets;
        let pip = cfg.pip_value(pair);
        let technical = signal.components.get(&Axis::Technical);
        let reference = self.reference_pips(pair, price, pip, technical);
        let target = targets::target_pips(
            tier,
            composite.score,
            composite.confidence,
            reference,
            technical,
            cfg,
        );
        let Some(levels) = targets::levels(decision.action, price, target, pip, cfg.risk_reward)
        else {
            return Ok(());
        };
        let days = days_remaining(stamp.now);

        signal.entry_price = Some(levels.entry);
        signal.exit_price = Some(levels.exit);
        signal.stop_loss = Some(levels.stop_loss);
        signal.take_profit = Some(levels.take_profit);
        signal.target_pips = Some(levels.target_pips);
        signal.days_to_target = Some(days);
        signal.achievement_probability = achievement_probability(
            target,
            reference,
            days,
            composite.confidence,
            tier,
            &self.config.probability,
        );
        Ok(())
    }

    /// Volatility reference in pips: reported weekly range, else the recent
    /// 4-hour close range, else a fixed fraction of price.
    fn reference_pips(
        &self,
        pair: &CurrencyPair,
        price: f64,
        pip: f64,
        technical: Option<&SignalComponent>,
    ) -> f64 {
        let reported = technical
            .and_then(|t| t.detail_f64(AVERAGE_WEEKLY_RANGE))
            .filter(|r| r.is_finite() && *r > 0.0);
        if let Some(range) = reported {
            return targets::to_reference_pips(range, pip);
        }

        let lookback = self.config.targets.volatility_lookback;
        match self.market.candles(&pair.code(), Interval::H4, lookback) {
            Ok(candles) => {
                if let Some(range) = targets::close_range(&candles).filter(|r| *r > 0.0) {
                    return targets::to_reference_pips(range, pip);
                }
            }
            Err(e) => debug!(pair = %pair, error = %e, "no candles for volatility reference"),
        }
        targets::to_reference_pips(price * self.config.targets.fallback_volatility_fraction, pip)
    }
}

fn run_analyzer(analyzer: &dyn Analyzer, pair: &CurrencyPair) -> SignalComponent {
    let axis = analyzer.axis();
    match panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(pair))) {
        Ok(Ok(component)) => component,
        Ok(Err(e)) => SignalComponent::failed(axis, e.to_string()),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            SignalComponent::failed(axis, format!("analyzer panicked: {msg}"))
        }
    }
}
