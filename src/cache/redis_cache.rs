//! Redis cache backend.
//!
//! List entries (`list:{kind}:...`) are recorded in a per-kind Redis set so
//! that `delete_pattern("list:{kind}:*")` can evict them without `SCAN`.
//! The multi-command sequences here are not atomic. A crash between
//! commands can leave a stale member in a tracking set or a key that is no
//! longer tracked; both are bounded by the entry TTL and harmless to
//! readers.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use super::keys::{pattern_matches, tracking_key_for, tracking_key_for_pattern};
use super::{Cache, CacheError, CacheResult};
use crate::lifecycle::Closable;

/// Redis cache over one multiplexed connection, cloned per call.
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect and verify the connection with a `PING`.
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        let _pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        tracing::info!("Connected to Redis");
        Ok(Self { conn })
    }
}

/// TTL in whole seconds, never below one (`SET EX 0` is rejected by Redis)
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

pub(crate) fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        CacheError::Connection(err.to_string())
    } else {
        CacheError::Operation(err.to_string())
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl_seconds(ttl);

        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(map_redis_error)?;

        if let Some(tracking_key) = tracking_key_for(key) {
            conn.sadd::<_, _, ()>(&tracking_key, key)
                .await
                .map_err(map_redis_error)?;
            // Outlives every member it records
            conn.expire::<_, ()>(&tracking_key, seconds as i64)
                .await
                .map_err(map_redis_error)?;
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();

        if let Some(tracking_key) = tracking_key_for(key) {
            conn.srem::<_, _, ()>(&tracking_key, key)
                .await
                .map_err(map_redis_error)?;
        }

        conn.del::<_, ()>(key).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await.map_err(map_redis_error)?;
        Ok(exists)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<()> {
        let Some(tracking_key) = tracking_key_for_pattern(pattern) else {
            // Only list entries are tracked
            tracing::warn!(pattern = %pattern, "Pattern delete requested for untracked keys");
            return Ok(());
        };

        let mut conn = self.conn.clone();
        let tracked: Vec<String> = conn
            .smembers(&tracking_key)
            .await
            .map_err(map_redis_error)?;

        let matching: Vec<&String> = tracked
            .iter()
            .filter(|key| pattern_matches(pattern, key))
            .collect();

        if !matching.is_empty() {
            conn.del::<_, ()>(&matching).await.map_err(map_redis_error)?;
            conn.srem::<_, _, ()>(&tracking_key, &matching)
                .await
                .map_err(map_redis_error)?;
        }

        tracing::trace!(pattern = %pattern, evicted = matching.len(), "Evicted tracked keys");
        Ok(())
    }
}

#[async_trait]
impl Closable for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn close(&self) -> anyhow::Result<()> {
        // The multiplexed connection shuts down once the last clone drops
        Ok(())
    }
}
