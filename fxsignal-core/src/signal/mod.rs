//! Composite signal generation

pub mod analyzer;
pub mod composite;
pub mod config;
pub mod decision;
pub mod generator;
pub mod probability;
pub mod session;
pub mod targets;
pub mod validate;

pub use analyzer::{AnalysisError, Analyzer, Snapshot, SnapshotAnalyzer};
pub use composite::{combine, Composite};
pub use config::{AxisWeights, SignalConfig};
pub use decision::{decide, Decision, DirectionalFallback, StrengthThresholds};
pub use generator::{next_friday, CompositeSignalGenerator};
pub use probability::{achievement_probability, days_remaining, ProbabilityConfig};
pub use session::{classify, SessionMultipliers};
pub use targets::{Levels, TargetConfig};
pub use validate::{validate_signal, ValidationError};
