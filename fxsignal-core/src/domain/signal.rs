//! TradingSignal: the composite decision for one pair.

use super::component::{Axis, SignalComponent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
            Action::Hold => "HOLD",
        })
    }
}

/// Strength ladder a directional signal cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTier {
    Weak,
    Medium,
    Strong,
}

/// Market session in effect at analysis time (UTC based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingSession {
    Weekend,
    LondonOpen,
    LondonUsOverlap,
    UsSession,
    Asian,
    Regular,
}

/// Composite signal for one pair, produced once per generation call.
///
/// Price levels are present only for BUY and SELL. For BUY
/// `exit_price > entry_price > stop_loss`; SELL mirrors it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub pair: String,
    pub action: Action,
    pub entry_price: Option<f64>,
    pub exit_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub target_pips: Option<f64>,
    pub confidence: f64,
    pub signal_strength: f64,
    pub days_to_target: Option<u32>,
    pub achievement_probability: f64,
    pub components: BTreeMap<Axis, SignalComponent>,
    pub analysis_timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tier: Option<SignalTier>,
    pub session: TradingSession,
    pub session_multiplier: f64,
    /// Set when the directional fallback policy produced the action.
    #[serde(default)]
    pub fallback: bool,
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl TradingSignal {
    /// HOLD with no price levels.
    pub fn hold(
        pair: impl Into<String>,
        analysis_timestamp: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        session: TradingSession,
        session_multiplier: f64,
    ) -> Self {
        Self {
            pair: pair.into(),
            action: Action::Hold,
            entry_price: None,
            exit_price: None,
            stop_loss: None,
            take_profit: None,
            target_pips: None,
            confidence: 0.0,
            signal_strength: 0.0,
            days_to_target: None,
            achievement_probability: 0.0,
            components: BTreeMap::new(),
            analysis_timestamp,
            expires_at,
            tier: None,
            session,
            session_multiplier,
            fallback: false,
            reason: None,
            error: None,
        }
    }

    /// HOLD carrying a captured failure.
    pub fn error_signal(
        pair: impl Into<String>,
        analysis_timestamp: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        session: TradingSession,
        error: impl Into<String>,
    ) -> Self {
        let mut s = Self::hold(pair, analysis_timestamp, expires_at, session, 1.0);
        s.error = Some(error.into());
        s
    }

    pub fn is_directional(&self) -> bool {
        matches!(self.action, Action::Buy | Action::Sell)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Reward distance over risk distance, when levels exist.
    pub fn risk_reward_ratio(&self) -> Option<f64> {
        let entry = self.entry_price?;
        let reward = (self.exit_price? - entry).abs();
        let risk = (entry - self.stop_loss?).abs();
        if risk > 0.0 {
            Some(reward / risk)
        } else {
            None
        }
    }
}
