//! Circuit breaker for unhealthy data providers.
//!
//! Closed → Open when consecutive failures reach the threshold, or when the
//! failure rate over the current closed period reaches its threshold once
//! enough calls have been seen. Open rejects immediately until the recovery
//! timeout elapses, then Half-open lets exactly one trial call through:
//! success closes the breaker, failure reopens it.
//!
//! Only errors whose [`ErrorKind`] is in the configured expected set are
//! counted; anything else passes through untouched.

use crate::clock::Clock;
use crate::data::{ErrorKind, FetchError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// `[circuit_breaker]` config section, shared by every provider's breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub failure_rate_threshold: f64,
    pub minimum_calls: u32,
    pub expected_errors: Vec<ErrorKind>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
            failure_rate_threshold: 0.5,
            minimum_calls: 10,
            expected_errors: ErrorKind::transient(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }
}

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation: requests are allowed.
    Closed,
    /// Tripped: all requests are refused until the recovery timeout elapses.
    Open,
    /// Probation: one trial request is allowed.
    HalfOpen,
}

/// Counters and current state, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub times_opened: u64,
    pub consecutive_failures: u32,
    pub failure_rate: f64,
    pub last_transition: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
    consecutive_failures: u32,
    window_calls: u32,
    window_failures: u32,
    trial_in_flight: bool,
    total_calls: u64,
    successes: u64,
    failures: u64,
    rejected: u64,
    times_opened: u64,
}

impl Inner {
    fn failure_rate(&self) -> f64 {
        if self.window_calls == 0 {
            0.0
        } else {
            self.window_failures as f64 / self.window_calls as f64
        }
    }
}

/// Whether a permitted call is the half-open trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Circuit breaker guarding one provider.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now();
        Self {
            name: name.into(),
            config,
            clock,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                opened_at: None,
                last_transition: now,
                consecutive_failures: 0,
                window_calls: 0,
                window_failures: 0,
                trial_in_flight: false,
                total_calls: 0,
                successes: 0,
                failures: 0,
                rejected: 0,
                times_opened: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker whose timeout has elapsed reports half-open.
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    /// Check if a request would currently be let through.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Fail fast while open, without taking a permit or recording an outcome.
    pub fn check(&self) -> Result<(), FetchError> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        let allowed = match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !inner.trial_in_flight,
        };
        if allowed {
            return Ok(());
        }
        inner.rejected += 1;
        Err(FetchError::CircuitOpen {
            provider: self.name.clone(),
        })
    }

    /// Run `f` under the breaker.
    pub fn call<T>(&self, f: impl FnOnce() -> Result<T, FetchError>) -> Result<T, FetchError> {
        let permit = self.before_call()?;
        match f() {
            Ok(value) => {
                self.on_success(permit);
                Ok(value)
            }
            Err(e) if self.config.expected_errors.contains(&e.kind()) => {
                self.on_failure(permit);
                Err(e)
            }
            Err(e) => {
                if permit == Permit::Trial {
                    self.inner.lock().trial_in_flight = false;
                }
                Err(e)
            }
        }
    }

    /// Remaining time before a trial call is allowed (zero unless open).
    pub fn remaining_cooldown(&self) -> Duration {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match (inner.state, inner.opened_at) {
            (BreakerState::Open, Some(opened_at)) => {
                let elapsed = (self.clock.now() - opened_at).to_std().unwrap_or(Duration::ZERO);
                self.config.recovery_timeout().saturating_sub(elapsed)
            }
            _ => Duration::ZERO,
        }
    }

    /// Immediately trip the breaker.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        self.open(&mut inner);
    }

    /// Back to closed with a clean failure window. Lifetime counters are kept.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.close(&mut inner);
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            total_calls: inner.total_calls,
            successes: inner.successes,
            failures: inner.failures,
            rejected: inner.rejected,
            times_opened: inner.times_opened,
            consecutive_failures: inner.consecutive_failures,
            failure_rate: inner.failure_rate(),
            last_transition: inner.last_transition,
        }
    }

    // ── Transitions ──

    fn refresh(&self, inner: &mut Inner) {
        if inner.state != BreakerState::Open {
            return;
        }
        let Some(opened_at) = inner.opened_at else {
            return;
        };
        let now = self.clock.now();
        let elapsed = (now - opened_at).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.config.recovery_timeout() {
            inner.state = BreakerState::HalfOpen;
            inner.trial_in_flight = false;
            inner.last_transition = now;
            info!(breaker = %self.name, "circuit half-open, allowing one trial call");
        }
    }

    fn before_call(&self) -> Result<Permit, FetchError> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(Permit::Normal),
            BreakerState::HalfOpen if !inner.trial_in_flight => {
                inner.trial_in_flight = true;
                Ok(Permit::Trial)
            }
            BreakerState::HalfOpen | BreakerState::Open => {
                inner.rejected += 1;
                Err(FetchError::CircuitOpen {
                    provider: self.name.clone(),
                })
            }
        }
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.successes += 1;
        match (permit, inner.state) {
            (Permit::Trial, BreakerState::HalfOpen) => {
                self.close(&mut inner);
                info!(breaker = %self.name, "trial call succeeded, circuit closed");
            }
            (_, BreakerState::Closed) => {
                inner.consecutive_failures = 0;
                inner.window_calls += 1;
            }
            _ => {}
        }
    }

    fn on_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        inner.total_calls += 1;
        inner.failures += 1;
        match (permit, inner.state) {
            (Permit::Trial, BreakerState::HalfOpen) => {
                self.open(&mut inner);
            }
            (_, BreakerState::Closed) => {
                inner.consecutive_failures += 1;
                inner.window_calls += 1;
                inner.window_failures += 1;
                let consecutive_breach = inner.consecutive_failures >= self.config.failure_threshold;
                let rate_breach = inner.window_calls >= self.config.minimum_calls
                    && inner.failure_rate() >= self.config.failure_rate_threshold;
                if consecutive_breach || rate_breach {
                    self.open(&mut inner);
                }
            }
            _ => {}
        }
    }

    fn open(&self, inner: &mut Inner) {
        let now = self.clock.now();
        inner.state = BreakerState::Open;
        inner.opened_at = Some(now);
        inner.last_transition = now;
        inner.trial_in_flight = false;
        inner.times_opened += 1;
        warn!(
            breaker = %self.name,
            consecutive_failures = inner.consecutive_failures,
            failure_rate = inner.failure_rate(),
            "circuit opened"
        );
    }

    fn close(&self, inner: &mut Inner) {
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
        inner.last_transition = self.clock.now();
        inner.trial_in_flight = false;
        inner.consecutive_failures = 0;
        inner.window_calls = 0;
        inner.window_failures = 0;
    }
}

/// One breaker per provider, created on first use from a shared config.
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(breakers.entry(provider.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                provider,
                self.config.clone(),
                Arc::clone(&self.clock),
            ))
        }))
    }

    pub fn stats(&self) -> BTreeMap<String, BreakerStats> {
        self.breakers
            .lock()
            .iter()
            .map(|(name, b)| (name.clone(), b.stats()))
            .collect()
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap(),
        ))
    }

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        CircuitBreaker::new("test", CircuitBreakerConfig::default(), clock)
    }

    fn fail(cb: &CircuitBreaker) -> Result<(), FetchError> {
        cb.call(|| Err::<(), _>(FetchError::Network("down".into())))
    }

    fn succeed(cb: &CircuitBreaker) -> Result<u32, FetchError> {
        cb.call(|| Ok(7))
    }

    #[test]
    fn starts_closed() {
        let cb = breaker(clock());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.is_allowed());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = breaker(clock());
        for _ in 0..4 {
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn open_rejects_without_calling() {
        let cb = breaker(clock());
        cb.force_open();
        let mut called = false;
        let result = cb.call(|| {
            called = true;
            Ok(())
        });
        assert!(!called);
        assert_eq!(result, Err(FetchError::CircuitOpen { provider: "test".into() }));
        assert_eq!(cb.stats().rejected, 1);
    }

    #[test]
    fn check_records_nothing_while_closed() {
        let cb = breaker(clock());
        for _ in 0..4 {
            let _ = fail(&cb);
            cb.check().unwrap();
        }
        assert_eq!(cb.stats().consecutive_failures, 4);
        assert_eq!(cb.stats().total_calls, 4);

        cb.force_open();
        assert!(cb.check().is_err());
        assert_eq!(cb.stats().rejected, 1);
    }

    #[test]
    fn success_resets_consecutive_counter() {
        let cb = breaker(clock());
        for _ in 0..4 {
            let _ = fail(&cb);
        }
        succeed(&cb).unwrap();
        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn failure_rate_opens_after_minimum_calls() {
        let cb = breaker(clock());
        // alternate so consecutive never exceeds 1; 5 of 10 is a 0.5 rate
        for _ in 0..4 {
            succeed(&cb).unwrap();
            let _ = fail(&cb);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        succeed(&cb).unwrap();
        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_after_recovery_timeout() {
        let clock = clock();
        let cb = breaker(clock.clone());
        cb.force_open();
        clock.advance(Duration::from_secs(59));
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.remaining_cooldown(), Duration::from_secs(1));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn trial_success_closes() {
        let clock = clock();
        let cb = breaker(clock.clone());
        cb.force_open();
        clock.advance(Duration::from_secs(60));
        assert_eq!(succeed(&cb), Ok(7));
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn trial_failure_reopens() {
        let clock = clock();
        let cb = breaker(clock.clone());
        cb.force_open();
        clock.advance(Duration::from_secs(60));
        let _ = fail(&cb);
        assert_eq!(cb.state(), BreakerState::Open);
        assert_eq!(cb.stats().times_opened, 2);
    }

    #[test]
    fn only_one_trial_in_flight() {
        let clock = clock();
        let cb = breaker(clock.clone());
        cb.force_open();
        clock.advance(Duration::from_secs(60));
        let inner = cb.call(|| {
            // a concurrent caller during the trial is rejected
            Ok(fail(&cb))
        });
        assert_eq!(
            inner,
            Ok(Err(FetchError::CircuitOpen { provider: "test".into() }))
        );
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn unexpected_errors_pass_through_unrecorded() {
        let cb = breaker(clock());
        for _ in 0..10 {
            let r = cb.call(|| Err::<(), _>(FetchError::Authentication("bad key".into())));
            assert_eq!(r.unwrap_err().kind(), ErrorKind::Authentication);
        }
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.stats().failures, 0);
    }

    #[test]
    fn reset_closes_and_keeps_lifetime_stats() {
        let cb = breaker(clock());
        for _ in 0..5 {
            let _ = fail(&cb);
        }
        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.state, BreakerState::Closed);
        assert_eq!(stats.failures, 5);
        assert_eq!(stats.consecutive_failures, 0);
    }

    #[test]
    fn registry_shares_breakers_per_provider() {
        let reg = BreakerRegistry::new(CircuitBreakerConfig::default(), clock());
        reg.get("alpha_vantage").force_open();
        assert_eq!(reg.get("alpha_vantage").state(), BreakerState::Open);
        assert_eq!(reg.get("twelve_data").state(), BreakerState::Closed);
        assert_eq!(reg.stats().len(), 2);
        reg.reset_all();
        assert_eq!(reg.get("alpha_vantage").state(), BreakerState::Closed);
    }
}
