//! Persistent per-day API usage counters.
//!
//! One JSON file per UTC date (`usage_YYYY-MM-DD.json`) mapping provider name
//! to the number of calls made that day. The rate limiter seeds its daily
//! counters from here so quotas survive restarts.

use chrono::NaiveDate;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("usage file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("usage file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Calls per provider for one day.
pub type UsageRecord = BTreeMap<String, u32>;

/// Directory-backed usage store.
#[derive(Debug)]
pub struct UsageStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl UsageStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("usage_{}.json", date.format("%Y-%m-%d")))
    }

    /// Usage for `date`. A missing file is an empty record.
    pub fn load(&self, date: NaiveDate) -> Result<UsageRecord, UsageError> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(UsageRecord::new());
        }
        let content = std::fs::read_to_string(&path)?;
        if content.trim().is_empty() {
            return Ok(UsageRecord::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn count(&self, provider: &str, date: NaiveDate) -> Result<u32, UsageError> {
        Ok(self.load(date)?.get(provider).copied().unwrap_or(0))
    }

    /// Read-modify-write one more call for `provider`. Returns the new count.
    pub fn increment(&self, provider: &str, date: NaiveDate) -> Result<u32, UsageError> {
        let _guard = self.write_lock.lock();
        let mut record = self.load(date)?;
        let count = record.entry(provider.to_string()).or_insert(0);
        *count += 1;
        let new_count = *count;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(date);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&record)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(new_count)
    }
}
