//! Alpha Vantage FX provider.
//!
//! Uses `CURRENCY_EXCHANGE_RATE` for quotes, `FX_INTRADAY` for 30-minute and
//! hourly candles and `FX_DAILY` for daily candles. Four-hour candles are not
//! offered by the API.
//!
//! Alpha Vantage reports quota exhaustion with HTTP 200 and a `Note` or
//! `Information` field, so the body is inspected before parsing.

use super::error::FetchError;
use super::provider::{check_status, http_client, parse_price, Interval, MarketDataProvider};
use crate::domain::{Candle, CurrencyPair};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

pub struct AlphaVantageProvider {
    name: String,
    api_key: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl AlphaVantageProvider {
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

    fn query(&self, params: &[(&str, &str)]) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()?;
        check_status(&resp)?;
        let body: Value = resp.json()?;
        check_body(&body)?;
        Ok(body)
    }
}

/// Detect the in-band error shapes Alpha Vantage uses.
fn check_body(body: &Value) -> Result<(), FetchError> {
    if let Some(msg) = body.get("Error Message").and_then(Value::as_str) {
        return Err(FetchError::ResponseFormat(msg.to_string()));
    }
    for key in ["Note", "Information"] {
        if let Some(msg) = body.get(key).and_then(Value::as_str) {
            let lower = msg.to_ascii_lowercase();
            if lower.contains("api key") && lower.contains("invalid") {
                return Err(FetchError::Authentication(msg.to_string()));
            }
            return Err(FetchError::UpstreamRateLimited {
                retry_after_secs: 60,
            });
        }
    }
    Ok(())
}

/// Extract the rate from a `CURRENCY_EXCHANGE_RATE` body.
fn parse_exchange_rate(body: &Value) -> Result<f64, FetchError> {
    let raw = body
        .get("Realtime Currency Exchange Rate")
        .and_then(|r| r.get("5. Exchange Rate"))
        .and_then(Value::as_str)
        .ok_or_else(|| FetchError::ResponseFormat("missing exchange rate".into()))?;
    parse_price(raw, "exchange rate")
}

/// Extract candles from an `FX_INTRADAY` / `FX_DAILY` body, oldest first.
fn parse_series(body: &Value, limit: usize) -> Result<Vec<Candle>, FetchError> {
    let series: &Map<String, Value> = body
        .as_object()
        .and_then(|o| {
            o.iter()
                .find(|(k, _)| k.starts_with("Time Series FX"))
                .and_then(|(_, v)| v.as_object())
        })
        .ok_or_else(|| FetchError::ResponseFormat("missing time series".into()))?;

    let mut candles = Vec::with_capacity(series.len());
    for (stamp, fields) in series {
        let timestamp = parse_stamp(stamp)?;
        let field = |name: &str| -> Result<f64, FetchError> {
            let raw = fields
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| FetchError::ResponseFormat(format!("{stamp}: missing '{name}'")))?;
            parse_price(raw, name)
        };
        let candle = Candle {
            timestamp,
            open: field("1. open")?,
            high: field("2. high")?,
            low: field("3. low")?,
            close: field("4. close")?,
        };
        if candle.is_sane() {
            candles.push(candle);
        }
    }

    candles.sort_by_key(|c| c.timestamp);
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    if candles.is_empty() {
        return Err(FetchError::DataUnavailable("empty time series".into()));
    }
    Ok(candles)
}

fn parse_stamp(stamp: &str) -> Result<chrono::DateTime<Utc>, FetchError> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }
    NaiveDate::parse_from_str(stamp, "%Y-%m-%d")
        .map(|d| Utc.from_utc_datetime(&d.and_time(NaiveTime::MIN)))
        .map_err(|_| FetchError::ResponseFormat(format!("invalid timestamp: {stamp}")))
}

impl MarketDataProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch_price(&self, pair: &CurrencyPair) -> Result<f64, FetchError> {
        let body = self.query(&[
            ("function", "CURRENCY_EXCHANGE_RATE"),
            ("from_currency", pair.base()),
            ("to_currency", pair.quote()),
        ])?;
        parse_exchange_rate(&body)
    }

    fn fetch_ohlc(
        &self,
        pair: &CurrencyPair,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>, FetchError> {
        let output_size = if limit > 100 { "full" } else { "compact" };
        let body = match interval {
            Interval::M30 | Interval::H1 => {
                let av_interval = if interval == Interval::M30 { "30min" } else { "60min" };
                self.query(&[
                    ("function", "FX_INTRADAY"),
                    ("from_symbol", pair.base()),
                    ("to_symbol", pair.quote()),
                    ("interval", av_interval),
                    ("outputsize", output_size),
                ])?
            }
            Interval::D1 => self.query(&[
                ("function", "FX_DAILY"),
                ("from_symbol", pair.base()),
                ("to_symbol", pair.quote()),
                ("outputsize", output_size),
            ])?,
            Interval::H4 => {
                return Err(FetchError::Unsupported {
                    provider: self.name.clone(),
                    what: "4h candles".into(),
                })
            }
        };
        parse_series(&body, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_exchange_rate() {
        let body = json!({
            "Realtime Currency Exchange Rate": {
                "1. From_Currency Code": "EUR",
                "3. To_Currency Code": "USD",
                "5. Exchange Rate": "1.08520000"
            }
        });
        assert_eq!(parse_exchange_rate(&body).unwrap(), 1.0852);
    }

    #[test]
    fn missing_rate_is_format_error() {
        assert!(matches!(
            parse_exchange_rate(&json!({})),
            Err(FetchError::ResponseFormat(_))
        ));
    }

    #[test]
    fn note_means_quota_exhausted() {
        let body = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute"});
        assert!(matches!(
            check_body(&body),
            Err(FetchError::UpstreamRateLimited { .. })
        ));
    }

    #[test]
    fn parses_daily_series_oldest_first_with_limit() {
        let body = json!({
            "Meta Data": {},
            "Time Series FX (Daily)": {
                "2024-01-17": {"1. open": "1.0880", "2. high": "1.0900", "3. low": "1.0850", "4. close": "1.0870"},
                "2024-01-16": {"1. open": "1.0950", "2. high": "1.0960", "3. low": "1.0870", "4. close": "1.0880"},
                "2024-01-15": {"1. open": "1.0950", "2. high": "1.0970", "3. low": "1.0940", "4. close": "1.0950"}
            }
        });
        let candles = parse_series(&body, 2).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 16, 0, 0, 0).unwrap());
        assert_eq!(candles[1].close, 1.0870);
    }

    #[test]
    fn parses_intraday_stamps() {
        let body = json!({
            "Time Series FX (60min)": {
                "2024-01-15 13:00:00": {"1. open": "1.0950", "2. high": "1.0970", "3. low": "1.0940", "4. close": "1.0960"}
            }
        });
        let candles = parse_series(&body, 10).unwrap();
        assert_eq!(candles[0].timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap());
    }
}
