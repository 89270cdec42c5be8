// ============================================================================
// Cache - Key/value store with per-entry TTL
// ============================================================================
//
// The cache holds derived, expendable copies only. It has no transactional
// relationship with the store, and every caller treats its failures as
// misses.
//
// ============================================================================

pub mod keys;
mod redis_cache;

use async_trait::async_trait;
use std::time::Duration;

use crate::lifecycle::Closable;

pub use redis_cache::RedisCache;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache connection failed: {0}")]
    Connection(String),

    #[error("Cache operation failed: {0}")]
    Operation(String),
}

#[async_trait]
pub trait Cache: Closable + Send + Sync {
    /// `None` on miss or expired entry
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key matching a trailing-wildcard pattern (`list:book:*`)
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<()>;
}
