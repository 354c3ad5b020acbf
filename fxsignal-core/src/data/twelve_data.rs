//! Twelve Data FX provider (`/price` and `/time_series`).

use super::error::FetchError;
use super::provider::{check_status, http_client, parse_price, Interval, MarketDataProvider};
use crate::domain::{Candle, CurrencyPair};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.twelvedata.com";
const MAX_OUTPUT_SIZE: usize = 5000;

/// Error envelope: `{"code": 429, "message": "...", "status": "error"}`.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceBody {
    price: String,
}

#[derive(Debug, Deserialize)]
struct SeriesBody {
    values: Vec<SeriesValue>,
}

#[derive(Debug, Deserialize)]
struct SeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
}

pub struct TwelveDataProvider {
    name: String,
    api_key: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl TwelveDataProvider {
    pub fn new(
        name: &str,
        api_key: String,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        Ok(Self {
            name: name.to_string(),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: http_client(timeout)?,
        })
    }

    fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<String, FetchError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()?;
        check_status(&resp)?;
        let text = resp.text()?;
        check_error_body(&text)?;
        Ok(text)
    }
}

/// Twelve Data returns HTTP 200 with an error envelope for most failures.
fn check_error_body(text: &str) -> Result<(), FetchError> {
    let Ok(body) = serde_json::from_str::<ErrorBody>(text) else {
        return Ok(());
    };
    if body.status.as_deref() != Some("error") {
        return Ok(());
    }
    let message = body.message.unwrap_or_else(|| "unknown error".into());
    Err(match body.code {
        Some(429) => FetchError::UpstreamRateLimited {
            retry_after_secs: 60,
        },
        Some(401) | Some(403) => FetchError::Authentication(message),
        Some(400) | Some(404) => FetchError::DataUnavailable(message),
        Some(code) if code >= 500 => FetchError::Server { status: code },
        _ => FetchError::ResponseFormat(message),
    })
}

fn parse_price_body(text: &str) -> Result<f64, FetchError> {
    let body: PriceBody = serde_json::from_str(text)
        .map_err(|e| FetchError::ResponseFormat(format!("price body: {e}")))?;
    parse_price(&body.price, "price")
}

fn parse_series_body(text: &str) -> Result<Vec<Candle>, FetchError> {
    let body: SeriesBody = serde_json::from_str(text)
        .map_err(|e| FetchError::ResponseFormat(format!("time_series body: {e}")))?;

    let mut candles = Vec::with_capacity(body.values.len());
    for v in &body.values {
        let candle = Candle {
            timestamp: parse_datetime(&v.datetime)?,
            open: parse_price(&v.open, "open")?,
            high: parse_price(&v.high, "high")?,
            low: parse_price(&v.low, "low")?,
            close: parse_price(&v.close, "close")?,
        };
        if candle.is_sane() {
            candles.push(candle);
        }
    }
    // API returns newest first
    candles.sort_by_key(|c| c.timestamp);
    if candles.is_empty() {
        return Err(FetchError::DataUnavailable("empty time series".into()));
    }
    Ok(candles)
}

fn parse_datetime(raw: &str) -> Result<chrono::DateTime<Utc>, FetchError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
        .map_err(|_| FetchError::ResponseFormat(format!("invalid datetime: {raw}")))
}

impl MarketDataProvider for TwelveDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_price(&self, pair: &CurrencyPair) -> Result<f64, FetchError> {
        let symbol = pair.slashed();
        let text = self.get("price", &[("symbol", symbol.as_str())])?;
        parse_price_body(&text)
    }

    fn fetch_ohlc(
        &self,
        pair: &CurrencyPair,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let symbol = pair.slashed();
        let output_size = limit.clamp(1, MAX_OUTPUT_SIZE).to_string();
        let text = self.get(
            "time_series",
            &[
                ("symbol", symbol.as_str()),
                ("interval", interval.as_str()),
                ("outputsize", output_size.as_str()),
                ("timezone", "UTC"),
            ],
        )?;
        parse_series_body(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_price() {
        assert_eq!(parse_price_body(r#"{"price":"151.23000"}"#).unwrap(), 151.23);
    }

    #[test]
    fn error_envelope_maps_to_kinds() {
        let limited = r#"{"code":429,"message":"You have run out of API credits","status":"error"}"#;
        assert!(matches!(
            check_error_body(limited),
            Err(FetchError::UpstreamRateLimited { .. })
        ));
        let bad_key = r#"{"code":401,"message":"apikey is incorrect","status":"error"}"#;
        assert!(matches!(check_error_body(bad_key), Err(FetchError::Authentication(_))));
        assert!(check_error_body(r#"{"price":"1.1"}"#).is_ok());
        assert!(check_error_body("not json").is_ok());
    }

    #[test]
    fn series_sorted_oldest_first() {
        let text = r#"{
            "meta": {"symbol": "EUR/USD", "interval": "4h"},
            "values": [
                {"datetime": "2024-01-15 08:00:00", "open": "1.0950", "high": "1.0970", "low": "1.0940", "close": "1.0960"},
                {"datetime": "2024-01-15 04:00:00", "open": "1.0940", "high": "1.0955", "low": "1.0930", "close": "1.0950"}
            ],
            "status": "ok"
        }"#;
        let candles = parse_series_body(text).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].timestamp < candles[1].timestamp);
        assert_eq!(candles[1].close, 1.0960);
    }

    #[test]
    fn insane_candles_dropped() {
        let text = r#"{"values": [
            {"datetime": "2024-01-15", "open": "1.0950", "high": "1.0900", "low": "1.0940", "close": "1.0960"}
        ]}"#;
        assert!(matches!(parse_series_body(text), Err(FetchError::DataUnavailable(_))));
    }
}
