//! Cache-aside order repository.
//!
//! The single place that knows about both the store and the cache:
//!
//! - **Read**: try the cache first; on miss load from the store, then
//!   populate the cache.
//! - **Write**: write to the store, then invalidate/overwrite the cache
//!   entry so a stale status cannot survive a state change within the TTL
//!   window.
//!
//! The cache is strictly best-effort. Every cache failure is logged and
//! swallowed; the store answers instead. The store alone decides success.

use tracing::warn;

use orderflow_core::{Order, OrderId, OrderStatus};

use crate::cache::OrderCache;
use crate::store::{OrderStore, StoreError};

/// Orders repository: durable store + best-effort cache.
#[derive(Debug, Clone)]
pub struct Orders<S, C> {
    store: S,
    cache: C,
}

impl<S, C> Orders<S, C>
where
    S: OrderStore,
    C: OrderCache,
{
    pub fn new(store: S, cache: C) -> Self {
        Self { store, cache }
    }

    /// Persist a new order, then warm the cache for subsequent reads.
    pub fn create(&self, order: Order) -> Result<Order, StoreError> {
        self.store.create(order.clone())?;

        if let Err(err) = self.cache.put(&order) {
            warn!(order_id = %order.id(), error = %err, "cache warm failed after create");
        }

        Ok(order)
    }

    /// Get an order by id (cache-aside).
    pub fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        match self.cache.get(id) {
            Ok(Some(order)) => return Ok(order),
            Ok(None) => {}
            Err(err) => {
                warn!(order_id = %id, error = %err, "cache read failed, falling back to store");
            }
        }

        let order = self.store.get(id)?;

        if let Err(err) = self.cache.put(&order) {
            warn!(order_id = %id, error = %err, "cache populate failed after miss");
        }

        Ok(order)
    }

    /// Conditionally advance an order's status and keep the cache consistent.
    ///
    /// Invalidate-then-overwrite: even if the overwrite fails, the stale
    /// entry is already gone and the next read goes to the store.
    pub fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError> {
        let order = self.store.update_status(id, expected, new)?;

        if let Err(err) = self.cache.invalidate(id) {
            warn!(order_id = %id, error = %err, "cache invalidation failed after status update");
        }
        if let Err(err) = self.cache.put(&order) {
            warn!(order_id = %id, error = %err, "cache repopulate failed after status update");
        }

        Ok(order)
    }

    /// Read straight from the store, bypassing the cache.
    pub fn get_uncached(&self, id: OrderId) -> Result<Order, StoreError> {
        self.store.get(id)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::{CacheError, InMemoryOrderCache};
    use crate::store::InMemoryOrderStore;

    /// Cache stub whose backend is permanently down.
    struct BrokenCache;

    impl OrderCache for BrokenCache {
        fn get(&self, _id: OrderId) -> Result<Option<Order>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        fn put(&self, _order: &Order) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        fn invalidate(&self, _id: OrderId) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }

    fn repo() -> Orders<InMemoryOrderStore, InMemoryOrderCache> {
        Orders::new(InMemoryOrderStore::new(), InMemoryOrderCache::new())
    }

    #[test]
    fn create_warms_the_cache() {
        let orders = repo();
        let created = orders.create(Order::new(serde_json::json!({"n": 1}))).unwrap();

        // Entry is served from the cache directly.
        let cached = orders.cache.get(created.id()).unwrap();
        assert_eq!(cached, Some(created));
    }

    #[test]
    fn get_populates_cache_on_miss() {
        let store = InMemoryOrderStore::new();
        let id = store.create(Order::new(serde_json::json!({}))).unwrap();

        let orders = Orders::new(store, InMemoryOrderCache::new());
        assert!(orders.cache.get(id).unwrap().is_none());

        let read = orders.get(id).unwrap();
        assert_eq!(orders.cache.get(id).unwrap(), Some(read));
    }

    #[test]
    fn status_update_replaces_stale_cache_entry() {
        let orders = repo();
        let created = orders.create(Order::new(serde_json::json!({}))).unwrap();
        let id = created.id();

        orders
            .update_status(id, OrderStatus::Created, OrderStatus::Processing)
            .unwrap();

        // The cached copy reflects the new status immediately, well inside
        // the TTL window.
        let cached = orders.cache.get(id).unwrap().unwrap();
        assert_eq!(cached.status(), OrderStatus::Processing);
        assert_eq!(orders.get(id).unwrap().status(), OrderStatus::Processing);
    }

    #[test]
    fn broken_cache_degrades_to_store_reads() {
        let orders = Orders::new(InMemoryOrderStore::new(), BrokenCache);
        let created = orders.create(Order::new(serde_json::json!({"x": 1}))).unwrap();

        let read = orders.get(created.id()).unwrap();
        assert_eq!(read, created);

        let updated = orders
            .update_status(created.id(), OrderStatus::Created, OrderStatus::Failed)
            .unwrap();
        assert_eq!(updated.status(), OrderStatus::Failed);
    }

    #[test]
    fn expired_cache_entry_falls_back_to_store() {
        let orders = Orders::new(
            InMemoryOrderStore::new(),
            InMemoryOrderCache::with_ttl(Duration::from_millis(10)),
        );
        let created = orders.create(Order::new(serde_json::json!({}))).unwrap();

        std::thread::sleep(Duration::from_millis(20));

        // Cache expired; the store still answers.
        assert_eq!(orders.get(created.id()).unwrap(), created);
    }

    #[test]
    fn store_errors_pass_through() {
        let orders = repo();
        assert!(matches!(
            orders.get(OrderId::new()),
            Err(StoreError::NotFound(_))
        ));
    }
}
