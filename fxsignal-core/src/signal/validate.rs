//! Sanity checks on a finished signal before it leaves the generator.

use crate::domain::{Action, TradingSignal};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },

    #[error("{field} = {value} is outside [{lo}, {hi}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("{action} signal is missing {field}")]
    MissingLevel { action: Action, field: &'static str },

    #[error("HOLD signal carries price levels")]
    UnexpectedLevels,

    #[error("{action} levels out of order: exit {exit}, entry {entry}, stop {stop}")]
    LevelOrder {
        action: Action,
        entry: f64,
        exit: f64,
        stop: f64,
    },
}

fn in_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    if value < lo || value > hi {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            lo,
            hi,
        });
    }
    Ok(())
}

fn level(
    signal: &TradingSignal,
    field: &'static str,
    value: Option<f64>,
) -> Result<f64, ValidationError> {
    let v = value.ok_or(ValidationError::MissingLevel {
        action: signal.action,
        field,
    })?;
    in_range(field, v, f64::MIN_POSITIVE, f64::MAX)?;
    Ok(v)
}

/// Check ranges and, for directional signals, level ordering.
pub fn validate_signal(signal: &TradingSignal) -> Result<(), ValidationError> {
    in_range("confidence", signal.confidence, 0.0, 1.0)?;
    in_range("signal_strength", signal.signal_strength, -1.0, 1.0)?;
    in_range("achievement_probability", signal.achievement_probability, 0.0, 1.0)?;

    if signal.action == Action::Hold {
        let any_level = signal.entry_price.is_some()
            || signal.exit_price.is_some()
            || signal.stop_loss.is_some()
            || signal.take_profit.is_some();
        return if any_level {
            Err(ValidationError::UnexpectedLevels)
        } else {
            Ok(())
        };
    }

    let entry = level(signal, "entry_price", signal.entry_price)?;
    let exit = level(signal, "exit_price", signal.exit_price)?;
    let stop = level(signal, "stop_loss", signal.stop_loss)?;
    level(signal, "take_profit", signal.take_profit)?;

    let ordered = match signal.action {
        Action::Buy => exit > entry && entry > stop,
        Action::Sell => exit < entry && entry < stop,
        Action::Hold => true,
    };
    if !ordered {
        return Err(ValidationError::LevelOrder {
            action: signal.action,
            entry,
            exit,
            stop,
        });
    }
    Ok(())
}
