//! Remote key/value tier.
//!
//! The cache manager only needs a handful of string operations from its
//! primary tier, so the backend sits behind [`RemoteStore`]. [`RedisStore`]
//! is the production implementation.

use super::CacheError;
use parking_lot::Mutex;
use redis::Commands;
use std::time::Duration;

/// String key/value store with per-key expiry.
pub trait RemoteStore: Send + Sync {
    /// Round-trip check used to (re)establish the connection.
    fn ping(&self) -> Result<(), CacheError>;

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Returns true if a key was removed.
    fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key matching a glob pattern. Returns the number removed.
    fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;

    /// Human-readable backend description for logs and stats.
    fn describe(&self) -> String;
}

/// Redis backend using the blocking client.
///
/// A single connection is held and dropped on any command error, so the next
/// use reconnects.
pub struct RedisStore {
    client: redis::Client,
    url: String,
    timeout: Duration,
    conn: Mutex<Option<redis::Connection>>,
}

impl RedisStore {
    /// Parse the URL. No connection is made until first use.
    pub fn open(url: &str, timeout: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
            conn: Mutex::new(None),
        })
    }

    fn connect(&self) -> Result<redis::Connection, CacheError> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, CacheError> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| CacheError::Unavailable(self.url.clone()))?;
        match f(conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                *guard = None;
                Err(e.into())
            }
        }
    }
}

impl RemoteStore for RedisStore {
    fn ping(&self) -> Result<(), CacheError> {
        self.with_conn(|c| redis::cmd("PING").query::<String>(c)).map(|_| ())
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let secs = ttl.as_secs().max(1);
        self.with_conn(|c| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(secs)
                .query::<()>(c)
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.with_conn(|c| redis::cmd("GET").arg(key).query::<Option<String>>(c))
    }

    fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.with_conn(|c| redis::cmd("DEL").arg(key).query::<u64>(c)).map(|n| n > 0)
    }

    fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        self.with_conn(|c| {
            let keys: Vec<String> = c.scan_match::<_, String>(pattern)?.collect();
            if keys.is_empty() {
                return Ok(0);
            }
            redis::cmd("DEL").arg(keys.as_slice()).query::<u64>(c)
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
