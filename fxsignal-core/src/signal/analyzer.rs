//! Analysis collaborators.
//!
//! The numeric internals of each axis live outside this crate. An
//! [`Analyzer`] returns one normalized [`SignalComponent`] per pair; the
//! generator never looks inside.

use crate::data::FetchError;
use crate::domain::{Axis, CurrencyPair, PairError, SignalComponent};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Data(#[from] FetchError),

    #[error("no {axis} analysis available for {pair}")]
    NotAvailable { axis: Axis, pair: String },

    #[error("{0}")]
    Failed(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl From<PairError> for AnalysisError {
    fn from(e: PairError) -> Self {
        AnalysisError::Snapshot(e.to_string())
    }
}

/// One analysis axis.
pub trait Analyzer: Send + Sync {
    fn axis(&self) -> Axis;

    /// Score `pair`. The returned weight is ignored; the generator applies the
    /// configured axis weight.
    fn analyze(&self, pair: &CurrencyPair) -> Result<SignalComponent, AnalysisError>;
}

// ── Snapshot analyzers ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct SnapshotEntry {
    score: f64,
    confidence: f64,
    #[serde(default)]
    details: BTreeMap<String, Value>,
}

/// Externally computed component scores:
///
/// ```json
/// { "EURUSD": { "technical": { "score": 0.4, "confidence": 0.7, "details": {} } } }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    by_pair: BTreeMap<CurrencyPair, BTreeMap<Axis, SnapshotEntry>>,
}

impl Snapshot {
    pub fn from_file(path: &Path) -> Result<Self, AnalysisError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::Snapshot(format!("read {}: {e}", path.display())))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, AnalysisError> {
        let raw: BTreeMap<String, BTreeMap<Axis, SnapshotEntry>> = serde_json::from_str(content)
            .map_err(|e| AnalysisError::Snapshot(format!("parse snapshot: {e}")))?;
        let mut by_pair = BTreeMap::new();
        for (code, axes) in raw {
            by_pair.insert(CurrencyPair::parse(&code)?, axes);
        }
        Ok(Self { by_pair })
    }

    pub fn pairs(&self) -> Vec<&CurrencyPair> {
        self.by_pair.keys().collect()
    }

    /// Axes present for at least one pair.
    pub fn axes(&self) -> Vec<Axis> {
        let mut axes: Vec<Axis> = self.by_pair.values().flat_map(|m| m.keys().copied()).collect();
        axes.sort();
        axes.dedup();
        axes
    }

    /// One analyzer per axis present in the snapshot.
    pub fn analyzers(self) -> Vec<SnapshotAnalyzer> {
        let axes = self.axes();
        let shared = Arc::new(self);
        axes.into_iter()
            .map(|axis| SnapshotAnalyzer::new(axis, Arc::clone(&shared)))
            .collect()
    }
}

/// Serves one axis out of a [`Snapshot`].
pub struct SnapshotAnalyzer {
    axis: Axis,
    snapshot: Arc<Snapshot>,
}

impl SnapshotAnalyzer {
    pub fn new(axis: Axis, snapshot: Arc<Snapshot>) -> Self {
        Self { axis, snapshot }
    }
}

impl Analyzer for SnapshotAnalyzer {
    fn axis(&self) -> Axis {
        self.axis
    }

    fn analyze(&self, pair: &CurrencyPair) -> Result<SignalComponent, AnalysisError> {
        let entry = self
            .snapshot
            .by_pair
            .get(pair)
            .and_then(|axes| axes.get(&self.axis))
            .ok_or_else(|| AnalysisError::NotAvailable {
                axis: self.axis,
                pair: pair.code(),
            })?;
        let mut component = SignalComponent::new(self.axis, entry.score, entry.confidence, 0.0);
        component.details = entry.details.clone();
        Ok(component)
    }
}
