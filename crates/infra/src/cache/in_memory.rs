//! In-memory TTL cache for tests/dev and single-process deployments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use orderflow_core::{Order, OrderId};

use super::{CacheError, OrderCache, DEFAULT_TTL};

#[derive(Debug, Clone)]
struct Slot {
    order: Order,
    expires_at: Instant,
}

/// In-memory order cache with absolute per-entry deadlines.
///
/// Entries expire `ttl` after the last `put`; reads never extend the
/// deadline. Expired entries are dropped lazily on access.
#[derive(Debug)]
pub struct InMemoryOrderCache {
    entries: Mutex<HashMap<OrderId, Slot>>,
    ttl: Duration,
}

impl InMemoryOrderCache {
    /// Cache with the default 5-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Cache with a custom TTL (tests use millisecond windows).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<OrderId, Slot>>, CacheError> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Unavailable("lock poisoned".to_string()))
    }
}

impl Default for InMemoryOrderCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderCache for InMemoryOrderCache {
    fn get(&self, id: OrderId) -> Result<Option<Order>, CacheError> {
        let mut entries = self.lock()?;

        match entries.get(&id) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.order.clone())),
            Some(_) => {
                // Lazy expiry: drop the stale slot so the map doesn't grow.
                entries.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, order: &Order) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        entries.insert(
            order.id(),
            Slot {
                order: order.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    fn invalidate(&self, id: OrderId) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        entries.remove(&id);
        Ok(())
    }
}
