//! Target, stop and take-profit levels.

use crate::domain::{Action, Candle, CurrencyPair, SignalComponent, SignalTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Detail key on the technical component holding the average weekly range
/// in price units.
pub const AVERAGE_WEEKLY_RANGE: &str = "average_weekly_range";
pub const STRONG_PATTERNS: &str = "strong_patterns";
pub const STRONG_INDICATORS: &str = "strong_indicators";

/// Reference used when volatility cannot be measured.
pub const DEFAULT_REFERENCE_PIPS: f64 = 200.0;

/// `[signal.targets]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub strong_pips: f64,
    pub medium_pips: f64,
    pub weak_pips: f64,
    pub min_target_pips: f64,
    pub max_target_pips: f64,
    /// Reward distance divided by risk distance.
    pub risk_reward: f64,
    pub confluence_min_score: f64,
    pub confluence_min_confidence: f64,
    /// Strong patterns or strong indicators needed for confluence.
    pub confluence_min_signals: u32,
    pub confluence_multiplier: f64,
    pub confluence_cap_pips: f64,
    /// Number of 4-hour candles measured when no weekly range is reported.
    pub volatility_lookback: usize,
    /// Fraction of price used as the reference when nothing else is known.
    pub fallback_volatility_fraction: f64,
    /// Per-pair pip size, keyed by six-letter code.
    pub pip_overrides: BTreeMap<String, f64>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            strong_pips: 200.0,
            medium_pips: 150.0,
            weak_pips: 100.0,
            min_target_pips: 100.0,
            max_target_pips: 200.0,
            risk_reward: 2.0,
            confluence_min_score: 0.8,
            confluence_min_confidence: 0.8,
            confluence_min_signals: 2,
            confluence_multiplier: 1.5,
            confluence_cap_pips: 150.0,
            volatility_lookback: 42,
            fallback_volatility_fraction: 0.02,
            pip_overrides: BTreeMap::new(),
        }
    }
}

impl TargetConfig {
    pub fn tier_pips(&self, tier: SignalTier) -> f64 {
        match tier {
            SignalTier::Strong => self.strong_pips,
            SignalTier::Medium => self.medium_pips,
            SignalTier::Weak => self.weak_pips,
        }
    }

    pub fn pip_value(&self, pair: &CurrencyPair) -> f64 {
        self.pip_overrides
            .get(&pair.code())
            .copied()
            .unwrap_or_else(|| pair.default_pip_value())
    }

    fn clamp_pips(&self, pips: f64) -> f64 {
        pips.clamp(self.min_target_pips, self.max_target_pips)
    }
}

/// Price levels for a directional signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Levels {
    pub entry: f64,
    pub exit: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub target_pips: f64,
}

/// Target distance in pips for `tier`.
///
/// A high-conviction signal whose technical component shows confluence, and
/// whose tier target is small relative to current volatility, is stretched by
/// the confluence multiplier up to the confluence cap.
pub fn target_pips(
    tier: SignalTier,
    score: f64,
    confidence: f64,
    reference_pips: f64,
    technical: Option<&SignalComponent>,
    config: &TargetConfig,
) -> f64 {
    let base = config.clamp_pips(config.tier_pips(tier));

    let conviction = score.abs() >= config.confluence_min_score
        && confidence >= config.confluence_min_confidence;
    if conviction && base < 0.5 * reference_pips && has_confluence(technical, config) {
        let stretched = (base * config.confluence_multiplier).min(config.confluence_cap_pips);
        if stretched > base {
            return config.clamp_pips(stretched);
        }
    }
    base
}

fn has_confluence(technical: Option<&SignalComponent>, config: &TargetConfig) -> bool {
    let Some(tech) = technical else {
        return false;
    };
    let needed = f64::from(config.confluence_min_signals);
    let count = |key: &str| tech.detail_f64(key).unwrap_or(0.0);
    count(STRONG_PATTERNS) >= needed || count(STRONG_INDICATORS) >= needed
}

/// Entry, exit and stop for a directional action; `None` for HOLD.
pub fn levels(
    action: Action,
    entry: f64,
    target_pips: f64,
    pip: f64,
    risk_reward: f64,
) -> Option<Levels> {
    let reward = target_pips * pip;
    let risk = reward / risk_reward;
    let (exit, stop_loss) = match action {
        Action::Buy => (entry + reward, entry - risk),
        Action::Sell => (entry - reward, entry + risk),
        Action::Hold => return None,
    };
    Some(Levels {
        entry,
        exit,
        stop_loss,
        take_profit: exit,
        target_pips,
    })
}

/// Price distance expressed in pips, falling back to
/// [`DEFAULT_REFERENCE_PIPS`] when it degenerates.
pub fn to_reference_pips(range: f64, pip: f64) -> f64 {
    let pips = range / pip;
    if pips.is_finite() && pips > 0.0 {
        pips
    } else {
        DEFAULT_REFERENCE_PIPS
    }
}

/// Highest minus lowest close over `candles`.
pub fn close_range(candles: &[Candle]) -> Option<f64> {
    let mut closes = candles.iter().map(|c| c.close).filter(|c| c.is_finite());
    let first = closes.next()?;
    let (lo, hi) = closes.fold((first, first), |(lo, hi), c| (lo.min(c), hi.max(c)));
    Some(hi - lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Axis;
    use chrono::{TimeZone, Utc};

    fn confluent_tech() -> SignalComponent {
        SignalComponent::new(Axis::Technical, 0.9, 0.9, 0.75).with_detail(STRONG_PATTERNS, 2)
    }

    #[test]
    fn tier_targets() {
        let cfg = TargetConfig::default();
        assert_eq!(target_pips(SignalTier::Strong, 0.5, 0.5, 300.0, None, &cfg), 200.0);
        assert_eq!(target_pips(SignalTier::Medium, 0.5, 0.5, 300.0, None, &cfg), 150.0);
        assert_eq!(target_pips(SignalTier::Weak, 0.5, 0.5, 300.0, None, &cfg), 100.0);
    }

    #[test]
    fn tier_targets_clamped_to_bounds() {
        let cfg = TargetConfig {
            strong_pips: 400.0,
            weak_pips: 20.0,
            ..TargetConfig::default()
        };
        assert_eq!(target_pips(SignalTier::Strong, 0.1, 0.1, 300.0, None, &cfg), 200.0);
        assert_eq!(target_pips(SignalTier::Weak, 0.1, 0.1, 300.0, None, &cfg), 100.0);
    }

    #[test]
    fn confluence_stretches_small_targets() {
        let cfg = TargetConfig::default();
        let tech = confluent_tech();
        // 100 < 0.5 × 300, so 100 × 1.5 = 150
        assert_eq!(target_pips(SignalTier::Weak, 0.85, 0.85, 300.0, Some(&tech), &cfg), 150.0);
        // medium is already at the cap
        assert_eq!(target_pips(SignalTier::Medium, 0.85, 0.85, 400.0, Some(&tech), &cfg), 150.0);
    }

    #[test]
    fn confluence_needs_every_condition() {
        let cfg = TargetConfig::default();
        let tech = confluent_tech();
        let weak = |s: f64, c: f64, r: f64, t: Option<&SignalComponent>| {
            target_pips(SignalTier::Weak, s, c, r, t, &cfg)
        };
        assert_eq!(weak(0.7, 0.9, 300.0, Some(&tech)), 100.0);
        assert_eq!(weak(0.9, 0.7, 300.0, Some(&tech)), 100.0);
        assert_eq!(weak(0.9, 0.9, 200.0, Some(&tech)), 100.0);
        assert_eq!(weak(0.9, 0.9, 300.0, None), 100.0);
        let lone = SignalComponent::new(Axis::Technical, 0.9, 0.9, 0.75)
            .with_detail(STRONG_PATTERNS, 1)
            .with_detail(STRONG_INDICATORS, 1);
        assert_eq!(weak(0.9, 0.9, 300.0, Some(&lone)), 100.0);
    }

    #[test]
    fn buy_and_sell_levels() {
        let buy = levels(Action::Buy, 1.1000, 200.0, 0.0001, 2.0).unwrap();
        assert!((buy.exit - 1.1200).abs() < 1e-12);
        assert!((buy.stop_loss - 1.0900).abs() < 1e-12);
        assert_eq!(buy.take_profit, buy.exit);

        let sell = levels(Action::Sell, 150.00, 100.0, 0.01, 2.0).unwrap();
        assert!((sell.exit - 149.00).abs() < 1e-9);
        assert!((sell.stop_loss - 150.50).abs() < 1e-9);

        assert!(levels(Action::Hold, 1.0, 100.0, 0.0001, 2.0).is_none());
    }

    #[test]
    fn pip_value_overrides() {
        let mut cfg = TargetConfig::default();
        let jpy = CurrencyPair::parse("USDJPY").unwrap();
        let gold = CurrencyPair::parse("XAUUSD").unwrap();
        assert_eq!(cfg.pip_value(&jpy), 0.01);
        assert_eq!(cfg.pip_value(&gold), 0.0001);
        cfg.pip_overrides.insert("XAUUSD".into(), 0.1);
        assert_eq!(cfg.pip_value(&gold), 0.1);
    }

    #[test]
    fn reference_pips_fall_back_when_degenerate() {
        assert!((to_reference_pips(0.0150, 0.0001) - 150.0).abs() < 1e-9);
        assert_eq!(to_reference_pips(0.0, 0.0001), DEFAULT_REFERENCE_PIPS);
        assert_eq!(to_reference_pips(f64::NAN, 0.0001), DEFAULT_REFERENCE_PIPS);
    }

    #[test]
    fn close_range_spans_closes() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let candle = |close| Candle {
            timestamp: ts,
            open: close,
            high: close,
            low: close,
            close,
        };
        let candles = [candle(1.10), candle(1.08), candle(1.12)];
        assert!((close_range(&candles).unwrap() - 0.04).abs() < 1e-12);
        assert_eq!(close_range(&[]), None);
    }
}
