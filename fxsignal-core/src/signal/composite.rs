//! Weighted combination of component scores.

use crate::domain::component::clamp_finite;
use crate::domain::SignalComponent;

/// Portion of the agreement bonus applied to the mean confidence.
pub const CONSISTENCY_BONUS_FACTOR: f64 = 0.2;

/// Composite score and confidence for a set of components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Composite {
    /// In `[-1, 1]`; sign is the direction.
    pub score: f64,
    /// In `[0, 1]`.
    pub confidence: f64,
}

/// Combine components.
///
/// The score is the weight and confidence weighted mean of component scores
/// (zero when no component carries weight and confidence). Confidence is the
/// mean component confidence plus a bonus for components agreeing on how sure
/// they are; it is zero when every component has zero confidence.
pub fn combine<'a, I>(components: I) -> Composite
where
    I: IntoIterator<Item = &'a SignalComponent>,
{
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut confidences = Vec::new();

    for c in components {
        let w = c.weight() * c.confidence();
        numerator += c.score() * w;
        denominator += w;
        confidences.push(c.confidence());
    }

    let score = if denominator > 0.0 {
        clamp_finite(numerator / denominator, -1.0, 1.0)
    } else {
        0.0
    };

    Composite {
        score,
        confidence: composite_confidence(&confidences),
    }
}

fn composite_confidence(confidences: &[f64]) -> f64 {
    if confidences.is_empty() || confidences.iter().all(|c| *c <= 0.0) {
        return 0.0;
    }
    let n = confidences.len() as f64;
    let mean = confidences.iter().sum::<f64>() / n;
    let variance = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
    let bonus = ((1.0 - variance.sqrt()) * CONSISTENCY_BONUS_FACTOR).max(0.0);
    clamp_finite(mean + bonus, 0.0, 1.0)
}
