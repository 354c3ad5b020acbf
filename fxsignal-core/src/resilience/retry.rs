//! Bounded exponential backoff with jitter.

use crate::clock::Clock;
use crate::data::{ErrorKind, FetchError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Largest jitter added on top of the computed delay, as a fraction of it.
pub const MAX_JITTER_FRACTION: f64 = 0.25;

/// `[retry]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
            retry_on: ErrorKind::transient(),
        }
    }
}

/// Retries a fallible call with exponential backoff.
pub struct RetryManager {
    config: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl RetryManager {
    pub fn new(config: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before retrying after attempt `attempt` (0-based).
    ///
    /// `jitter_sample` in `[0, 1)` scales the jitter; the returned delay lies in
    /// `[d, d * 1.25)` where `d = min(base * exp_base^attempt, max)`.
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exp = self.config.exponential_base.powi(attempt as i32);
        let mut delay = (base * exp).min(max);
        if self.config.jitter {
            delay += delay * MAX_JITTER_FRACTION * jitter_sample.clamp(0.0, 1.0);
        }
        Duration::from_millis(delay.max(0.0).round() as u64)
    }

    /// Run `op` up to `max_attempts` times. `op` receives the 0-based attempt index.
    ///
    /// Errors outside the allow-list return immediately. After the last attempt
    /// the final error is returned unchanged.
    pub fn run<T>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let retryable = self.config.retry_on.contains(&e.kind());
                    if !retryable || attempt + 1 >= attempts {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt, rand::thread_rng().gen::<f64>());
                    debug!(
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after failure"
                    );
                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
