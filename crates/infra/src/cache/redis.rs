//! Redis-backed order cache (optional).
//!
//! Entries are JSON-serialized orders stored under `order:{uuid}` with a
//! server-side TTL (`SET ... EX`), so expiry holds even across process
//! restarts. Connection failures surface as `CacheError::Unavailable`; the
//! repository layer degrades to direct store reads.

use std::time::Duration;

use redis::Commands;

use orderflow_core::{Order, OrderId};

use super::{cache_key, CacheError, OrderCache, DEFAULT_TTL};

/// Redis order cache.
#[derive(Debug, Clone)]
pub struct RedisOrderCache {
    client: redis::Client,
    ttl: Duration,
}

impl RedisOrderCache {
    /// Cache with the default 5-minute TTL.
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, CacheError> {
        Self::with_ttl(redis_url, DEFAULT_TTL)
    }

    /// Cache with a custom TTL.
    pub fn with_ttl(redis_url: impl AsRef<str>, ttl: Duration) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { client, ttl })
    }

    fn connection(&self) -> Result<redis::Connection, CacheError> {
        self.client
            .get_connection()
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

impl OrderCache for RedisOrderCache {
    fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        let mut conn = self.connection()?;

        let raw: Option<String> = conn
            .get(cache_key(id))
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        match raw {
            Some(json) => {
                let order = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }

    fn put(&self, order: &Order) -> Result<(), CacheError> {
        let json = serde_json::to_string(order)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;
        let () = conn
            .set_ex(cache_key(order.id()), json, self.ttl.as_secs())
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(())
    }

    fn invalidate(&self, id: OrderId) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        let () = conn
            .del(cache_key(id))
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(())
    }
}
