//! Trading-session lookup and its volatility multiplier.
//!
//! Sessions are decided purely from UTC time:
//!
//! | window (UTC)          | session            | default |
//! |-----------------------|--------------------|---------|
//! | Saturday, Sunday      | weekend            | 0.5     |
//! | 08:00 to 09:00        | London open        | 1.3     |
//! | 13:00 to 15:00        | London/US overlap  | 1.5     |
//! | 15:00 to 16:00        | US session         | 1.4     |
//! | 23:00 to 08:00        | Asian              | 0.8     |
//! | otherwise             | regular            | 1.0     |

use crate::domain::TradingSession;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// `[signal.sessions]` config table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMultipliers {
    pub weekend: f64,
    pub london_open: f64,
    pub overlap: f64,
    pub us_session: f64,
    pub asian: f64,
    pub regular: f64,
}

impl Default for SessionMultipliers {
    fn default() -> Self {
        Self {
            weekend: 0.5,
            london_open: 1.3,
            overlap: 1.5,
            us_session: 1.4,
            asian: 0.8,
            regular: 1.0,
        }
    }
}

impl SessionMultipliers {
    pub fn multiplier(&self, session: TradingSession) -> f64 {
        match session {
            TradingSession::Weekend => self.weekend,
            TradingSession::LondonOpen => self.london_open,
            TradingSession::LondonUsOverlap => self.overlap,
            TradingSession::UsSession => self.us_session,
            TradingSession::Asian => self.asian,
            TradingSession::Regular => self.regular,
        }
    }

    /// Session in effect at `at` together with its multiplier.
    pub fn lookup(&self, at: DateTime<Utc>) -> (TradingSession, f64) {
        let session = classify(at);
        (session, self.multiplier(session))
    }

    pub(crate) fn all(&self) -> [f64; 6] {
        [
            self.weekend,
            self.london_open,
            self.overlap,
            self.us_session,
            self.asian,
            self.regular,
        ]
    }
}

pub fn classify(at: DateTime<Utc>) -> TradingSession {
    if matches!(at.weekday(), Weekday::Sat | Weekday::Sun) {
        return TradingSession::Weekend;
    }
    match at.hour() {
        8 => TradingSession::LondonOpen,
        13 | 14 => TradingSession::LondonUsOverlap,
        15 => TradingSession::UsSession,
        23 | 0..=7 => TradingSession::Asian,
        _ => TradingSession::Regular,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        // January 2024: the 15th is a Monday
        Utc.with_ymd_and_hms(2024, 1, day, hour, minute, 0).unwrap()
    }

    #[test]
    fn weekday_windows() {
        assert_eq!(classify(at(15, 8, 0)), TradingSession::LondonOpen);
        assert_eq!(classify(at(15, 8, 59)), TradingSession::LondonOpen);
        assert_eq!(classify(at(15, 9, 0)), TradingSession::Regular);
        assert_eq!(classify(at(16, 13, 0)), TradingSession::LondonUsOverlap);
        assert_eq!(classify(at(16, 14, 59)), TradingSession::LondonUsOverlap);
        assert_eq!(classify(at(17, 15, 30)), TradingSession::UsSession);
        assert_eq!(classify(at(17, 16, 0)), TradingSession::Regular);
        assert_eq!(classify(at(18, 23, 0)), TradingSession::Asian);
        assert_eq!(classify(at(18, 7, 59)), TradingSession::Asian);
        assert_eq!(classify(at(19, 12, 0)), TradingSession::Regular);
    }

    #[test]
    fn weekend_overrides_hour() {
        assert_eq!(classify(at(20, 8, 30)), TradingSession::Weekend);
        assert_eq!(classify(at(21, 14, 0)), TradingSession::Weekend);
    }

    #[test]
    fn default_multipliers() {
        let m = SessionMultipliers::default();
        assert_eq!(m.lookup(at(15, 13, 30)), (TradingSession::LondonUsOverlap, 1.5));
        assert_eq!(m.lookup(at(20, 13, 30)), (TradingSession::Weekend, 0.5));
        assert_eq!(m.lookup(at(15, 11, 0)), (TradingSession::Regular, 1.0));
    }
}
