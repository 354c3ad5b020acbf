//! Domain types for FXSignal

pub mod candle;
pub mod component;
pub mod pair;
pub mod signal;

pub use candle::Candle;
pub use component::{Axis, SignalComponent};
pub use pair::{CurrencyPair, PairError};
pub use signal::{Action, SignalTier, TradingSession, TradingSignal};
