//! Probability that the target is reached before expiry.

use crate::domain::component::clamp_finite;
use crate::domain::SignalTier;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// `(max target/reference ratio, base probability)`, checked in order.
const RATIO_BANDS: [(f64, f64); 3] = [(0.5, 0.8), (0.7, 0.65), (1.0, 0.5)];
const BEYOND_REFERENCE: f64 = 0.3;

/// `[signal.probability]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbabilityConfig {
    /// Trading days after which time no longer limits the probability.
    pub full_time_days: f64,
    pub strong_boost: f64,
    pub strong_cap: f64,
    pub medium_boost: f64,
    pub medium_cap: f64,
}

impl Default for ProbabilityConfig {
    fn default() -> Self {
        Self {
            full_time_days: 3.0,
            strong_boost: 1.2,
            strong_cap: 0.95,
            medium_boost: 1.1,
            medium_cap: 0.85,
        }
    }
}

/// Trading days left in the week: 5 on Monday down to 1 on Friday, and a full
/// week again over the weekend.
pub fn days_remaining(at: DateTime<Utc>) -> u32 {
    let left = 5 - at.weekday().num_days_from_monday() as i64;
    if left <= 0 {
        5
    } else {
        left as u32
    }
}

pub fn achievement_probability(
    target_pips: f64,
    reference_pips: f64,
    days_remaining: u32,
    confidence: f64,
    tier: SignalTier,
    config: &ProbabilityConfig,
) -> f64 {
    let ratio = if reference_pips > 0.0 {
        target_pips / reference_pips
    } else {
        f64::INFINITY
    };
    let base = RATIO_BANDS
        .iter()
        .find(|(max_ratio, _)| ratio <= *max_ratio)
        .map(|(_, p)| *p)
        .unwrap_or(BEYOND_REFERENCE);

    let time_factor = if config.full_time_days > 0.0 {
        (f64::from(days_remaining) / config.full_time_days).min(1.0)
    } else {
        1.0
    };
    let p = base * time_factor * clamp_finite(confidence, 0.0, 1.0);

    let boosted = match tier {
        SignalTier::Strong => (p * config.strong_boost).min(config.strong_cap),
        SignalTier::Medium => (p * config.medium_boost).min(config.medium_cap),
        SignalTier::Weak => p,
    };
    clamp_finite(boosted, 0.0, 1.0)
}
