//! Per-provider call budgets.
//!
//! - Minute and hour limits use a sliding window of call timestamps. A call
//!   leaves the window once its age reaches the period.
//! - Daily limits use a counter that resets at the next UTC midnight.
//! - [`RateLimiter::acquire`] blocks (through the [`Clock`]) until every rule
//!   for a provider has room, up to a bounded maximum wait.

use crate::clock::Clock;
use crate::data::FetchError;
use crate::resilience::usage::UsageStore;
use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MIN_POLL_SLEEP: Duration = Duration::from_millis(100);

/// Which budget a rule constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    Minute,
    Hour,
    Daily,
}

impl LimitKind {
    pub fn default_period(&self) -> Duration {
        match self {
            LimitKind::Minute => Duration::from_secs(60),
            LimitKind::Hour => Duration::from_secs(3600),
            LimitKind::Daily => Duration::from_secs(86_400),
        }
    }
}

/// One configured limit, e.g. `{ kind = "minute", limit = 5 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub kind: LimitKind,
    pub limit: u32,
    /// Overrides the kind's natural period for sliding windows.
    #[serde(default)]
    pub period_secs: Option<u64>,
}

impl RateLimitRule {
    pub fn new(kind: LimitKind, limit: u32) -> Self {
        Self {
            kind,
            limit,
            period_secs: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.kind.default_period())
    }
}

/// `[rate_limiter]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub max_wait_secs: u64,
    pub max_sleep_per_poll_secs: u64,
    pub limits: BTreeMap<String, Vec<RateLimitRule>>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        let mut limits = BTreeMap::new();
        limits.insert(
            "alpha_vantage".to_string(),
            vec![
                RateLimitRule::new(LimitKind::Minute, 5),
                RateLimitRule::new(LimitKind::Daily, 500),
            ],
        );
        limits.insert(
            "twelve_data".to_string(),
            vec![
                RateLimitRule::new(LimitKind::Minute, 8),
                RateLimitRule::new(LimitKind::Daily, 800),
            ],
        );
        limits.insert("fred".to_string(), vec![RateLimitRule::new(LimitKind::Minute, 120)]);
        limits.insert("finnhub".to_string(), vec![RateLimitRule::new(LimitKind::Minute, 60)]);
        limits.insert("polygon".to_string(), vec![RateLimitRule::new(LimitKind::Minute, 5)]);
        limits.insert("marketstack".to_string(), vec![RateLimitRule::new(LimitKind::Hour, 100)]);
        Self {
            max_wait_secs: 300,
            max_sleep_per_poll_secs: 60,
            limits,
        }
    }
}

impl RateLimiterConfig {
    pub fn rules_for(&self, provider: &str) -> &[RateLimitRule] {
        self.limits.get(provider).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug)]
struct Window {
    period: Duration,
    calls: VecDeque<DateTime<Utc>>,
}

impl Window {
    fn new(period: Duration) -> Self {
        Self {
            period,
            calls: VecDeque::new(),
        }
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let period = to_chrono(self.period);
        while let Some(&oldest) = self.calls.front() {
            if now - oldest >= period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
struct ProviderState {
    minute: Window,
    hour: Window,
    daily_count: u32,
    daily_reset_at: DateTime<Utc>,
}

impl ProviderState {
    fn new(now: DateTime<Utc>, seeded_daily: u32) -> Self {
        Self {
            minute: Window::new(LimitKind::Minute.default_period()),
            hour: Window::new(LimitKind::Hour.default_period()),
            daily_count: seeded_daily,
            daily_reset_at: next_utc_midnight(now),
        }
    }

    fn window_mut(&mut self, kind: LimitKind) -> Option<&mut Window> {
        match kind {
            LimitKind::Minute => Some(&mut self.minute),
            LimitKind::Hour => Some(&mut self.hour),
            LimitKind::Daily => None,
        }
    }

    fn roll_daily(&mut self, now: DateTime<Utc>) {
        if now >= self.daily_reset_at {
            self.daily_count = 0;
            self.daily_reset_at = next_utc_midnight(now);
        }
    }

    fn can_make_call(
        &mut self,
        kind: LimitKind,
        limit: u32,
        period: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.window_mut(kind) {
            Some(window) => {
                window.period = period;
                window.evict(now);
                window.calls.len() < limit as usize
            }
            None => {
                self.roll_daily(now);
                self.daily_count < limit
            }
        }
    }

    fn record(&mut self, kind: LimitKind, now: DateTime<Utc>) {
        match self.window_mut(kind) {
            Some(window) => window.calls.push_back(now),
            None => {
                self.roll_daily(now);
                self.daily_count += 1;
            }
        }
    }

    fn time_until_reset(&mut self, kind: LimitKind, now: DateTime<Utc>) -> Duration {
        match self.window_mut(kind) {
            Some(window) => {
                window.evict(now);
                match window.calls.front() {
                    Some(&oldest) => (oldest + to_chrono(window.period) - now)
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                    None => Duration::ZERO,
                }
            }
            None => {
                self.roll_daily(now);
                if self.daily_count == 0 {
                    Duration::ZERO
                } else {
                    (self.daily_reset_at - now).to_std().unwrap_or(Duration::ZERO)
                }
            }
        }
    }
}

/// Point-in-time view of one provider's consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub minute_calls: usize,
    pub hour_calls: usize,
    pub daily_calls: u32,
    pub daily_reset_at: DateTime<Utc>,
}

/// Thread-safe rate limiter shared by every fetch pipeline.
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    usage: Option<Arc<UsageStore>>,
    providers: Mutex<HashMap<String, Arc<Mutex<ProviderState>>>>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("providers", &self.providers.lock().len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            usage: None,
            providers: Mutex::new(HashMap::new()),
        }
    }

    /// Persist daily counts to `store` and seed them from it.
    pub fn with_usage_store(mut self, store: Arc<UsageStore>) -> Self {
        self.usage = Some(store);
        self
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn state(&self, provider: &str) -> Arc<Mutex<ProviderState>> {
        let mut providers = self.providers.lock();
        if let Some(state) = providers.get(provider) {
            return Arc::clone(state);
        }
        let now = self.clock.now();
        let seeded = match &self.usage {
            Some(store) => store.count(provider, now.date_naive()).unwrap_or_else(|e| {
                warn!(provider, error = %e, "could not read persisted usage, starting from zero");
                0
            }),
            None => 0,
        };
        let state = Arc::new(Mutex::new(ProviderState::new(now, seeded)));
        providers.insert(provider.to_string(), Arc::clone(&state));
        state
    }

    /// True if one more call fits within `limit` calls per `period`.
    pub fn can_make_call(
        &self,
        provider: &str,
        kind: LimitKind,
        limit: u32,
        period: Duration,
    ) -> bool {
        let now = self.clock.now();
        self.state(provider).lock().can_make_call(kind, limit, period, now)
    }

    /// Count one call against `kind`.
    pub fn record_call(&self, provider: &str, kind: LimitKind) {
        let now = self.clock.now();
        self.state(provider).lock().record(kind, now);
        if kind == LimitKind::Daily {
            self.persist_daily(provider, now);
        }
    }

    /// How long until the next slot frees. Zero when nothing is pending.
    pub fn time_until_reset(&self, provider: &str, kind: LimitKind) -> Duration {
        let now = self.clock.now();
        self.state(provider).lock().time_until_reset(kind, now)
    }

    pub fn usage(&self, provider: &str) -> UsageSnapshot {
        let now = self.clock.now();
        let state = self.state(provider);
        let mut s = state.lock();
        s.minute.evict(now);
        s.hour.evict(now);
        s.roll_daily(now);
        UsageSnapshot {
            minute_calls: s.minute.calls.len(),
            hour_calls: s.hour.calls.len(),
            daily_calls: s.daily_count,
            daily_reset_at: s.daily_reset_at,
        }
    }

    /// Block until every rule has room, without consuming a slot.
    pub fn wait_for_capacity(
        &self,
        provider: &str,
        rules: &[RateLimitRule],
    ) -> Result<(), FetchError> {
        self.wait_until_permitted(provider, rules, false)
    }

    /// Block until every rule has room, then record the call against all of them.
    pub fn acquire(&self, provider: &str, rules: &[RateLimitRule]) -> Result<(), FetchError> {
        self.wait_until_permitted(provider, rules, true)
    }

    fn wait_until_permitted(
        &self,
        provider: &str,
        rules: &[RateLimitRule],
        record: bool,
    ) -> Result<(), FetchError> {
        if rules.is_empty() {
            return Ok(());
        }
        let max_wait = Duration::from_secs(self.config.max_wait_secs);
        let poll_cap =
            Duration::from_secs(self.config.max_sleep_per_poll_secs).max(MIN_POLL_SLEEP);
        let state = self.state(provider);
        let mut waited = Duration::ZERO;

        loop {
            let now = self.clock.now();
            let wait = {
                let mut s = state.lock();
                let blocked: Vec<&RateLimitRule> = rules
                    .iter()
                    .filter(|r| !s.can_make_call(r.kind, r.limit, r.period(), now))
                    .collect();
                if blocked.is_empty() {
                    if record {
                        for rule in rules {
                            s.record(rule.kind, now);
                        }
                    }
                    None
                } else {
                    Some(
                        blocked
                            .iter()
                            .map(|r| s.time_until_reset(r.kind, now))
                            .max()
                            .unwrap_or(Duration::ZERO),
                    )
                }
            };

            let Some(wait) = wait else {
                if record && rules.iter().any(|r| r.kind == LimitKind::Daily) {
                    self.persist_daily(provider, now);
                }
                return Ok(());
            };

            if waited >= max_wait {
                warn!(provider, waited_secs = waited.as_secs(), "rate limit wait exhausted");
                return Err(FetchError::RateLimitExceeded {
                    provider: provider.to_string(),
                    waited_secs: waited.as_secs(),
                });
            }

            let remaining = max_wait - waited;
            let sleep_for = wait.min(poll_cap).max(MIN_POLL_SLEEP).min(remaining);
            debug!(provider, sleep_ms = sleep_for.as_millis() as u64, "rate limited, waiting");
            self.clock.sleep(sleep_for);
            waited += sleep_for;
        }
    }

    fn persist_daily(&self, provider: &str, now: DateTime<Utc>) {
        if let Some(store) = &self.usage {
            if let Err(e) = store.increment(provider, now.date_naive()) {
                warn!(provider, error = %e, "could not persist API usage");
            }
        }
    }
}

fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc() + chrono::Duration::days(1)
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
