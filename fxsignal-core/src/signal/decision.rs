//! BUY/SELL/HOLD decision from the composite score.

use crate::domain::{Action, SignalTier};
use serde::{Deserialize, Serialize};

/// `[signal.thresholds]`: minimum effective strength per tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthThresholds {
    pub strong: f64,
    pub medium: f64,
    pub weak: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        Self {
            strong: 0.3,
            medium: 0.1,
            weak: 0.02,
        }
    }
}

impl StrengthThresholds {
    /// Highest tier `effective` clears, if any.
    pub fn tier_for(&self, effective: f64) -> Option<SignalTier> {
        if effective >= self.strong {
            Some(SignalTier::Strong)
        } else if effective >= self.medium {
            Some(SignalTier::Medium)
        } else if effective >= self.weak {
            Some(SignalTier::Weak)
        } else {
            None
        }
    }
}

/// DirectionalFallback policy (`[signal.fallback]`).
///
/// When the effective strength clears no tier, a composite bias larger than
/// `min_bias` still produces a weak directional signal. Signals produced this
/// way carry `fallback = true`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectionalFallback {
    pub enabled: bool,
    pub min_bias: f64,
}

impl Default for DirectionalFallback {
    fn default() -> Self {
        Self {
            enabled: true,
            min_bias: 0.005,
        }
    }
}

/// Outcome of the decision step.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub tier: Option<SignalTier>,
    /// `|score| × confidence × session multiplier`.
    pub effective_strength: f64,
    pub fallback: bool,
    pub reason: String,
}

impl Decision {
    fn hold(effective_strength: f64, reason: String) -> Self {
        Self {
            action: Action::Hold,
            tier: None,
            effective_strength,
            fallback: false,
            reason,
        }
    }
}

pub fn decide(
    score: f64,
    confidence: f64,
    session_multiplier: f64,
    thresholds: &StrengthThresholds,
    confidence_floor: f64,
    fallback: &DirectionalFallback,
) -> Decision {
    let effective = score.abs() * confidence * session_multiplier;

    if confidence <= confidence_floor {
        return Decision::hold(
            effective,
            format!("confidence {confidence:.3} at or below floor {confidence_floor:.3}"),
        );
    }
    let direction = if score > 0.0 {
        Action::Buy
    } else if score < 0.0 {
        Action::Sell
    } else {
        return Decision::hold(effective, "no directional bias".into());
    };

    if let Some(tier) = thresholds.tier_for(effective) {
        return Decision {
            action: direction,
            tier: Some(tier),
            effective_strength: effective,
            fallback: false,
            reason: format!("effective strength {effective:.3} cleared {tier:?} tier"),
        };
    }

    if fallback.enabled && score.abs() > fallback.min_bias {
        return Decision {
            action: direction,
            tier: Some(SignalTier::Weak),
            effective_strength: effective,
            fallback: true,
            reason: format!(
                "directional fallback: bias {:.3} above {:.3}",
                score.abs(),
                fallback.min_bias
            ),
        };
    }

    Decision::hold(
        effective,
        format!("effective strength {effective:.3} below weak threshold {:.3}", thresholds.weak),
    )
}
