//! Order cache: a time-boxed, read-through mirror of the store.
//!
//! The cache never originates data. Any store/cache divergence resolves in
//! favor of the store; a broken cache backend degrades to direct store
//! reads and must never fail the request (the repository layer enforces
//! this).

use std::sync::Arc;
use std::time::Duration;

use orderflow_core::{Order, OrderId};

mod in_memory;
#[cfg(feature = "redis")]
mod redis;

pub use in_memory::InMemoryOrderCache;
#[cfg(feature = "redis")]
pub use redis::RedisOrderCache;

/// Default time-to-live for cached orders.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cache error. Always treated as best-effort by callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The cache backend is unreachable.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A cached entry failed to (de)serialize.
    #[error("cache serialization: {0}")]
    Serialization(String),
}

/// TTL-bound order cache.
///
/// The TTL is absolute from the last `put` (no sliding expiration), so
/// staleness is strictly bounded even under continuous reads.
pub trait OrderCache: Send + Sync {
    /// Look up a cached order. `Ok(None)` is a miss, not an error.
    fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError>;

    /// Store an order, (re)starting its TTL window.
    fn put(&self, order: &Order) -> Result<(), CacheError>;

    /// Drop the entry for an order. Safe to call when no entry exists.
    fn invalidate(&self, id: OrderId) -> Result<(), CacheError>;
}

impl<C> OrderCache for Arc<C>
where
    C: OrderCache + ?Sized,
{
    fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        (**self).get(id)
    }

    fn put(&self, order: &Order) -> Result<(), CacheError> {
        (**self).put(order)
    }

    fn invalidate(&self, id: OrderId) -> Result<(), CacheError> {
        (**self).invalidate(id)
    }
}

/// Redis key for an order entry: `order:{uuid}`.
#[cfg(feature = "redis")]
pub(crate) fn cache_key(id: OrderId) -> String {
    format!("order:{id}")
}
