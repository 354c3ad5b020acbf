//! SignalComponent: one analysis axis' verdict on a pair.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Independent analysis axes combined into a composite signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Technical,
    Economic,
    Sentiment,
    Geopolitical,
}

impl Axis {
    pub const ALL: [Axis; 4] = [
        Axis::Technical,
        Axis::Economic,
        Axis::Sentiment,
        Axis::Geopolitical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Technical => "technical",
            Axis::Economic => "economic",
            Axis::Sentiment => "sentiment",
            Axis::Geopolitical => "geopolitical",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp into `[lo, hi]`, mapping NaN to zero.
pub(crate) fn clamp_finite(value: f64, lo: f64, hi: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(lo, hi)
    }
}

/// Score, confidence and weight of one axis.
///
/// Numeric fields are clamped on every write: score to `[-1, 1]`,
/// confidence and weight to `[0, 1]`. Deserialization goes through the same path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawComponent")]
pub struct SignalComponent {
    component: Axis,
    score: f64,
    confidence: f64,
    weight: f64,
    pub details: BTreeMap<String, Value>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct RawComponent {
    component: Axis,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    weight: f64,
    #[serde(default)]
    details: BTreeMap<String, Value>,
    #[serde(default)]
    error: Option<String>,
}

impl From<RawComponent> for SignalComponent {
    fn from(raw: RawComponent) -> Self {
        let mut c = SignalComponent::new(raw.component, raw.score, raw.confidence, raw.weight);
        c.details = raw.details;
        c.error = raw.error;
        c
    }
}

impl SignalComponent {
    pub fn new(component: Axis, score: f64, confidence: f64, weight: f64) -> Self {
        Self {
            component,
            score: clamp_finite(score, -1.0, 1.0),
            confidence: clamp_finite(confidence, 0.0, 1.0),
            weight: clamp_finite(weight, 0.0, 1.0),
            details: BTreeMap::new(),
            error: None,
        }
    }

    /// Zero score and confidence, carrying the failure text.
    pub fn failed(component: Axis, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut c = Self::new(component, 0.0, 0.0, 0.0);
        c.details.insert("error".into(), Value::String(error.clone()));
        c.error = Some(error);
        c
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = clamp_finite(weight, 0.0, 1.0);
        self
    }

    pub fn component(&self) -> Axis {
        self.component
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Numeric detail lookup, accepting integers and floats.
    pub fn detail_f64(&self, key: &str) -> Option<f64> {
        self.details.get(key).and_then(Value::as_f64)
    }
}
