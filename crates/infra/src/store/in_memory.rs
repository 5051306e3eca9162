//! In-memory order store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use orderflow_core::{Order, OrderId, OrderStatus};

use super::{OrderQuery, OrderStore, StoreError};

/// In-memory order store.
///
/// Intended for tests/dev. Writes take the lock for the whole
/// read-check-write of `update_status`, which is what makes the conditional
/// update atomic here.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl OrderStore for InMemoryOrderStore {
    fn create(&self, order: Order) -> Result<OrderId, StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let id = order.id();
        if orders.contains_key(&id) {
            return Err(StoreError::DuplicateKey(id));
        }
        orders.insert(id, order);
        Ok(id)
    }

    fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        orders.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut orders = self
            .orders
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let order = orders.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if order.status() != expected {
            return Err(StoreError::Conflict(format!(
                "expected status {expected}, found {}",
                order.status()
            )));
        }

        order
            .transition_to(new)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        Ok(order.clone())
    }
}

#[async_trait::async_trait]
impl OrderQuery for InMemoryOrderStore {
    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let orders = self
            .orders
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".to_string()))?;

        let mut result: Vec<_> = orders.values().cloned().collect();
        result.sort_by_key(|o| std::cmp::Reverse(o.created_at()));
        result.truncate(limit);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get_returns_identical_payload() {
        let store = InMemoryOrderStore::new();
        let payload = serde_json::json!({"items": [{"sku": "A-1", "qty": 2}], "total": 41.0});
        let order = Order::new(payload.clone());
        let id = store.create(order).unwrap();

        let read = store.get(id).unwrap();
        assert_eq!(read.payload(), &payload);
        assert_eq!(read.status(), OrderStatus::Created);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let store = InMemoryOrderStore::new();
        let order = Order::new(serde_json::json!({}));
        let dup = order.clone();

        store.create(order).unwrap();
        assert!(matches!(
            store.create(dup),
            Err(StoreError::DuplicateKey(_))
        ));
    }

    #[test]
    fn get_unknown_id_is_not_found() {
        let store = InMemoryOrderStore::new();
        assert!(matches!(
            store.get(OrderId::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn conditional_update_advances_status() {
        let store = InMemoryOrderStore::new();
        let id = store.create(Order::new(serde_json::json!({}))).unwrap();

        let updated = store
            .update_status(id, OrderStatus::Created, OrderStatus::Processing)
            .unwrap();
        assert_eq!(updated.status(), OrderStatus::Processing);

        let updated = store
            .update_status(id, OrderStatus::Processing, OrderStatus::Completed)
            .unwrap();
        assert_eq!(updated.status(), OrderStatus::Completed);
    }

    #[test]
    fn stale_expected_status_conflicts() {
        let store = InMemoryOrderStore::new();
        let id = store.create(Order::new(serde_json::json!({}))).unwrap();

        store
            .update_status(id, OrderStatus::Created, OrderStatus::Processing)
            .unwrap();

        // A second worker that still believes the order is `created` loses.
        assert!(matches!(
            store.update_status(id, OrderStatus::Created, OrderStatus::Processing),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn terminal_orders_cannot_move_backwards() {
        let store = InMemoryOrderStore::new();
        let id = store.create(Order::new(serde_json::json!({}))).unwrap();

        store
            .update_status(id, OrderStatus::Created, OrderStatus::Processing)
            .unwrap();
        store
            .update_status(id, OrderStatus::Processing, OrderStatus::Completed)
            .unwrap();

        assert!(matches!(
            store.update_status(id, OrderStatus::Completed, OrderStatus::Processing),
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Completed);
    }

    #[test]
    fn list_recent_returns_newest_first() {
        let store = InMemoryOrderStore::new();
        let first = store.create(Order::new(serde_json::json!({"n": 1}))).unwrap();
        let second = store.create(Order::new(serde_json::json!({"n": 2}))).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let recent = rt.block_on(store.list_recent(10)).unwrap();

        assert_eq!(recent.len(), 2);
        // UUIDv7 ids are time-ordered together with created_at.
        assert_eq!(recent[0].id(), second);
        assert_eq!(recent[1].id(), first);
    }
}
