//! Two-tier response cache (remote key/value store + bounded in-process map).

pub mod manager;
pub mod store;

pub use manager::{CacheConfig, CacheManager, CacheStats, CacheTier, CachedApiResponse, TtlClass};
pub use store::{RedisStore, RemoteStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
