//! `[signal]` configuration.

use super::decision::{DirectionalFallback, StrengthThresholds};
use super::probability::ProbabilityConfig;
use super::session::SessionMultipliers;
use super::targets::TargetConfig;
use crate::domain::Axis;
use serde::{Deserialize, Serialize};

/// Per-axis weight. Zero disables the axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisWeights {
    pub technical: f64,
    pub economic: f64,
    pub sentiment: f64,
    pub geopolitical: f64,
}

impl Default for AxisWeights {
    fn default() -> Self {
        Self {
            technical: 0.75,
            economic: 0.20,
            sentiment: 0.0,
            geopolitical: 0.05,
        }
    }
}

impl AxisWeights {
    pub fn weight(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Technical => self.technical,
            Axis::Economic => self.economic,
            Axis::Sentiment => self.sentiment,
            Axis::Geopolitical => self.geopolitical,
        }
    }

    /// Axes with a positive weight, in [`Axis::ALL`] order.
    pub fn enabled(&self) -> Vec<(Axis, f64)> {
        Axis::ALL
            .iter()
            .map(|a| (*a, self.weight(*a)))
            .filter(|(_, w)| *w > 0.0)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub weights: AxisWeights,
    pub thresholds: StrengthThresholds,
    /// Composite confidence at or below this is always HOLD.
    pub confidence_floor: f64,
    pub sessions: SessionMultipliers,
    pub fallback: DirectionalFallback,
    pub targets: TargetConfig,
    pub probability: ProbabilityConfig,
    /// Pairs generated concurrently by `generate_signals`; 1 is sequential.
    pub max_parallel_pairs: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            weights: AxisWeights::default(),
            thresholds: StrengthThresholds::default(),
            confidence_floor: 0.25,
            sessions: SessionMultipliers::default(),
            fallback: DirectionalFallback::default(),
            targets: TargetConfig::default(),
            probability: ProbabilityConfig::default(),
            max_parallel_pairs: 1,
        }
    }
}

fn unit(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{name} must be within [0, 1], got {value}"))
    }
}

fn positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{name} must be positive, got {value}"))
    }
}

impl SignalConfig {
    /// Reject inconsistent settings.
    pub fn validate(&self) -> Result<(), String> {
        for axis in Axis::ALL {
            unit(&format!("signal.weights.{axis}"), self.weights.weight(axis))?;
        }

        let t = &self.thresholds;
        for (name, v) in [("strong", t.strong), ("medium", t.medium), ("weak", t.weak)] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("signal.thresholds.{name} must be non-negative, got {v}"));
            }
        }
        if !(t.strong >= t.medium && t.medium >= t.weak) {
            return Err("signal.thresholds must satisfy strong >= medium >= weak".into());
        }

        unit("signal.confidence_floor", self.confidence_floor)?;
        unit("signal.fallback.min_bias", self.fallback.min_bias)?;
        if self.sessions.all().iter().any(|m| !m.is_finite() || *m < 0.0) {
            return Err("signal.sessions multipliers must be non-negative".into());
        }

        let tg = &self.targets;
        positive("signal.targets.min_target_pips", tg.min_target_pips)?;
        positive("signal.targets.max_target_pips", tg.max_target_pips)?;
        if tg.min_target_pips > tg.max_target_pips {
            return Err(format!(
                "signal.targets.min_target_pips ({}) exceeds max_target_pips ({})",
                tg.min_target_pips, tg.max_target_pips
            ));
        }
        positive("signal.targets.risk_reward", tg.risk_reward)?;
        positive("signal.targets.confluence_multiplier", tg.confluence_multiplier)?;
        positive(
            "signal.targets.fallback_volatility_fraction",
            tg.fallback_volatility_fraction,
        )?;
        for (pair, pip) in &tg.pip_overrides {
            positive(&format!("signal.targets.pip_overrides.{pair}"), *pip)?;
        }

        let p = &self.probability;
        unit("signal.probability.strong_cap", p.strong_cap)?;
        unit("signal.probability.medium_cap", p.medium_cap)?;
        positive("signal.probability.strong_boost", p.strong_boost)?;
        positive("signal.probability.medium_boost", p.medium_boost)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(SignalConfig::default().validate(), Ok(()));
    }

    #[test]
    fn sentiment_disabled_by_default() {
        let enabled = AxisWeights::default().enabled();
        let axes: Vec<Axis> = enabled.into_iter().map(|(a, _)| a).collect();
        assert_eq!(axes, vec![Axis::Technical, Axis::Economic, Axis::Geopolitical]);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: SignalConfig = toml::from_str(
            r#"
            confidence_floor = 0.3
            [weights]
            sentiment = 0.1
            [fallback]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.confidence_floor, 0.3);
        assert_eq!(cfg.weights.sentiment, 0.1);
        assert_eq!(cfg.weights.technical, 0.75);
        assert!(!cfg.fallback.enabled);
        assert_eq!(cfg.fallback.min_bias, 0.005);
        assert_eq!(cfg.targets.max_target_pips, 200.0);
    }

    #[test]
    fn rejects_inverted_targets_and_negative_weights() {
        let mut cfg = SignalConfig::default();
        cfg.targets.min_target_pips = 250.0;
        assert!(cfg.validate().unwrap_err().contains("min_target_pips"));

        let mut cfg = SignalConfig::default();
        cfg.weights.economic = -0.1;
        assert!(cfg.validate().unwrap_err().contains("weights.economic"));

        let mut cfg = SignalConfig::default();
        cfg.thresholds.weak = 0.5;
        assert!(cfg.validate().is_err());
    }
}
