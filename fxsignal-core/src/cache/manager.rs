//! Two-tier cache: remote store first, bounded in-process map as fallback.
//!
//! When the remote tier fails the manager demotes itself to the fallback map
//! and only tries the remote again on a later call, once the reconnect
//! interval has passed. Reads consult both tiers so entries written during an
//! outage stay visible after the remote comes back.

use super::store::RemoteStore;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifiers longer than this are replaced by their BLAKE3 hash.
pub const MAX_KEY_ID_LEN: usize = 200;

/// Which default TTL a provider's responses get.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
    Price,
    Economic,
    News,
}

/// `[cache]` config section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub redis_url: Option<String>,
    pub timeout_secs: u64,
    pub namespace: String,
    pub fallback_max_entries: usize,
    pub fallback_evict_batch: usize,
    pub reconnect_interval_secs: u64,
    pub default_ttl_secs: u64,
    pub price_ttl_secs: u64,
    pub economic_ttl_secs: u64,
    pub news_ttl_secs: u64,
    pub provider_ttl_class: BTreeMap<String, TtlClass>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let provider_ttl_class = [
            ("alpha_vantage", TtlClass::Price),
            ("twelve_data", TtlClass::Price),
            ("fred", TtlClass::Economic),
            ("finnhub", TtlClass::Economic),
            ("central_bank", TtlClass::Economic),
            ("news_api", TtlClass::News),
            ("reddit", TtlClass::News),
            ("gdelt", TtlClass::News),
        ]
        .into_iter()
        .map(|(p, c)| (p.to_string(), c))
        .collect();

        Self {
            enabled: true,
            redis_url: Some("redis://localhost:6379/0".into()),
            timeout_secs: 5,
            namespace: "fxsignal".into(),
            fallback_max_entries: 1000,
            fallback_evict_batch: 100,
            reconnect_interval_secs: 30,
            default_ttl_secs: 3600,
            price_ttl_secs: 3600,
            economic_ttl_secs: 14_400,
            news_ttl_secs: 1800,
            provider_ttl_class,
        }
    }
}

impl CacheConfig {
    /// Default TTL for responses from `provider`.
    pub fn ttl_for(&self, provider: &str) -> Duration {
        let secs = match self.provider_ttl_class.get(provider) {
            Some(TtlClass::Price) => self.price_ttl_secs,
            Some(TtlClass::Economic) => self.economic_ttl_secs,
            Some(TtlClass::News) => self.news_ttl_secs,
            None => self.default_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Which tier served or stored an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Remote,
    Fallback,
}

/// Envelope stored by [`CacheManager::cache_api_response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedApiResponse<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
    pub provider: String,
    pub endpoint: String,
}

/// Snapshot of cache health and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub remote: Option<String>,
    pub remote_connected: bool,
    pub fallback_entries: usize,
    pub fallback_max_entries: usize,
    pub remote_hits: u64,
    pub fallback_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub demotions: u64,
}

#[derive(Debug)]
struct FallbackEntry {
    seq: u64,
    value: String,
    expires_at: DateTime<Utc>,
}

/// Insertion-ordered bounded map.
#[derive(Debug, Default)]
struct FallbackTier {
    entries: HashMap<String, FallbackEntry>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl FallbackTier {
    fn insert(
        &mut self,
        key: String,
        value: String,
        expires_at: DateTime<Utc>,
        max: usize,
        batch: usize,
    ) {
        if let Some(old) = self.entries.remove(&key) {
            self.order.remove(&old.seq);
        } else if self.entries.len() >= max {
            for _ in 0..batch.max(1) {
                let Some((_, oldest)) = self.order.pop_first() else {
                    break;
                };
                self.entries.remove(&oldest);
            }
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.entries.insert(key, FallbackEntry { seq, value, expires_at });
    }

    fn get(&mut self, key: &str, now: DateTime<Utc>) -> Option<String> {
        let expired = match self.entries.get(key) {
            None => return None,
            Some(entry) => now > entry.expires_at,
        };
        if expired {
            self.remove(key);
            None
        } else {
            self.entries.get(key).map(|e| e.value.clone())
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    fn remove_prefixed(&mut self, prefix: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for k in &keys {
            self.remove(k);
        }
        keys.len()
    }
}

#[derive(Debug, Default)]
struct RemoteHealth {
    connected: bool,
    last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Counters {
    remote_hits: u64,
    fallback_hits: u64,
    misses: u64,
    writes: u64,
    demotions: u64,
}

/// Two-tier TTL cache shared across fetch pipelines.
pub struct CacheManager {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    remote: Option<Arc<dyn RemoteStore>>,
    health: Mutex<RemoteHealth>,
    fallback: Mutex<FallbackTier>,
    counters: Mutex<Counters>,
}

impl CacheManager {
    /// Cache with an optional remote tier. `None` runs on the fallback map alone.
    pub fn new(
        config: CacheConfig,
        remote: Option<Arc<dyn RemoteStore>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            clock,
            remote,
            health: Mutex::new(RemoteHealth::default()),
            fallback: Mutex::new(FallbackTier::default()),
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Namespaced storage key for `id`.
    pub fn storage_key(&self, id: &str) -> String {
        let id = if id.len() > MAX_KEY_ID_LEN {
            blake3::hash(id.as_bytes()).to_hex().to_string()
        } else {
            id.to_string()
        };
        format!("{}:cache:{}", self.config.namespace, id)
    }

    /// Store `value` for `ttl`. Returns false only if nothing could be stored.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        if !self.config.enabled {
            return false;
        }
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable");
                return false;
            }
        };
        let full_key = self.storage_key(key);
        self.counters.lock().writes += 1;

        if let Some(remote) = self.usable_remote() {
            match remote.set_ex(&full_key, &serialized, ttl) {
                Ok(()) => {
                    // An outage-era copy must not outlive the fresh remote entry.
                    self.fallback.lock().remove(&full_key);
                    return true;
                }
                Err(e) => self.demote(&e),
            }
        }

        let now = self.clock.now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.fallback.lock().insert(
            full_key,
            serialized,
            expires_at,
            self.config.fallback_max_entries,
            self.config.fallback_evict_batch,
        );
        true
    }

    /// Look `key` up in the remote tier, then the fallback tier.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let (raw, _) = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Raw JSON text and the tier that served it.
    pub fn get_raw(&self, key: &str) -> Option<(String, CacheTier)> {
        if !self.config.enabled {
            return None;
        }
        let full_key = self.storage_key(key);

        if let Some(remote) = self.usable_remote() {
            match remote.get(&full_key) {
                Ok(Some(value)) => {
                    self.counters.lock().remote_hits += 1;
                    debug!(key, tier = "remote", "cache hit");
                    return Some((value, CacheTier::Remote));
                }
                Ok(None) => {}
                Err(e) => self.demote(&e),
            }
        }

        let now = self.clock.now();
        let hit = self.fallback.lock().get(&full_key, now);
        let mut counters = self.counters.lock();
        match hit {
            Some(value) => {
                counters.fallback_hits += 1;
                debug!(key, tier = "fallback", "cache hit");
                Some((value, CacheTier::Fallback))
            }
            None => {
                counters.misses += 1;
                debug!(key, "cache miss");
                None
            }
        }
    }

    /// Remove `key` from both tiers. True if either held it.
    pub fn delete(&self, key: &str) -> bool {
        let full_key = self.storage_key(key);
        let mut removed = false;
        if let Some(remote) = self.usable_remote() {
            match remote.delete(&full_key) {
                Ok(r) => removed |= r,
                Err(e) => self.demote(&e),
            }
        }
        removed |= self.fallback.lock().remove(&full_key);
        removed
    }

    /// Clear entries whose identifier starts with `prefix`, or the whole namespace.
    pub fn clear(&self, prefix: Option<&str>) -> usize {
        let ns = &self.config.namespace;
        let (remote_pattern, local_prefix) = match prefix {
            Some(p) => (format!("{ns}:cache:{p}*"), format!("{ns}:cache:{p}")),
            None => (format!("{ns}:*"), format!("{ns}:")),
        };
        let mut cleared = 0usize;
        if let Some(remote) = self.usable_remote() {
            match remote.delete_matching(&remote_pattern) {
                Ok(n) => cleared += n as usize,
                Err(e) => self.demote(&e),
            }
        }
        cleared += self.fallback.lock().remove_prefixed(&local_prefix);
        info!(cleared, pattern = %remote_pattern, "cache cleared");
        cleared
    }

    /// Key for an API response: `provider:endpoint:hash(sorted params)`.
    pub fn api_key<P: Serialize + ?Sized>(provider: &str, endpoint: &str, params: &P) -> String {
        let canonical = serde_json::to_value(params)
            .map(|v| canonical_json(&v))
            .unwrap_or_default();
        let digest = blake3::hash(canonical.as_bytes()).to_hex();
        format!("{provider}:{endpoint}:{digest}")
    }

    /// Cache an API response. Without `ttl` the provider's default TTL applies.
    pub fn cache_api_response<P, T>(
        &self,
        provider: &str,
        endpoint: &str,
        params: &P,
        data: &T,
        ttl: Option<Duration>,
    ) -> bool
    where
        P: Serialize + ?Sized,
        T: Serialize + Clone,
    {
        let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(provider));
        let envelope = CachedApiResponse {
            data: data.clone(),
            cached_at: self.clock.now(),
            provider: provider.to_string(),
            endpoint: endpoint.to_string(),
        };
        self.set(&Self::api_key(provider, endpoint, params), &envelope, ttl)
    }

    pub fn get_cached_api_response<P, T>(
        &self,
        provider: &str,
        endpoint: &str,
        params: &P,
    ) -> Option<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.get::<CachedApiResponse<T>>(&Self::api_key(provider, endpoint, params))
            .map(|e| e.data)
    }

    pub fn stats(&self) -> CacheStats {
        let connected = self.remote.is_some() && self.health.lock().connected;
        let counters = self.counters.lock();
        CacheStats {
            remote: self.remote.as_ref().map(|r| r.describe()),
            remote_connected: connected,
            fallback_entries: self.fallback.lock().entries.len(),
            fallback_max_entries: self.config.fallback_max_entries,
            remote_hits: counters.remote_hits,
            fallback_hits: counters.fallback_hits,
            misses: counters.misses,
            writes: counters.writes,
            demotions: counters.demotions,
        }
    }

    // ── Remote tier health ──

    /// The remote store if it is connected, or if a reconnect attempt is due and succeeds.
    fn usable_remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        let remote = self.remote.as_ref()?;
        let mut health = self.health.lock();
        if health.connected {
            return Some(remote);
        }
        let now = self.clock.now();
        let interval = chrono::Duration::seconds(self.config.reconnect_interval_secs as i64);
        if let Some(last) = health.last_failure {
            if now - last < interval {
                return None;
            }
        }
        match remote.ping() {
            Ok(()) => {
                health.connected = true;
                info!(remote = %remote.describe(), "cache remote tier connected");
                Some(remote)
            }
            Err(e) => {
                health.last_failure = Some(now);
                warn!(
                    remote = %remote.describe(),
                    error = %e,
                    "cache remote tier unavailable, using fallback"
                );
                None
            }
        }
    }

    fn demote(&self, error: &super::CacheError) {
        let mut health = self.health.lock();
        if health.connected {
            warn!(error = %error, "cache remote tier failed, demoting to fallback");
            self.counters.lock().demotions += 1;
        }
        health.connected = false;
        health.last_failure = Some(self.clock.now());
    }
}

/// JSON text with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
