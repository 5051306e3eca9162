//! Order storage: the durable source of truth, keyed by order id.

use std::sync::Arc;

use orderflow_core::{Order, OrderId, OrderStatus};

mod in_memory;
mod postgres;

pub use in_memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

/// Order store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Unknown order id.
    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// Id collision on create; the caller must generate a fresh identifier.
    #[error("order already exists: {0}")]
    DuplicateKey(OrderId),

    /// The conditional update lost the race or the transition violates the
    /// monotonic lifecycle.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend is temporarily unreachable (retryable).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Corrupt or undecodable stored data (not retryable).
    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable order store.
///
/// The store is the only mutable shared resource in the pipeline. Per-order
/// ordering is enforced with the conditional update in
/// [`OrderStore::update_status`]; there is no cross-order coordination.
pub trait OrderStore: Send + Sync {
    /// Persist a new order. Fails with [`StoreError::DuplicateKey`] if the
    /// id already exists.
    fn create(&self, order: Order) -> Result<OrderId, StoreError>;

    /// Load an order by id.
    fn get(&self, id: OrderId) -> Result<Order, StoreError>;

    /// Atomically move an order from `expected` to `new`.
    ///
    /// Fails with [`StoreError::Conflict`] when the stored status differs
    /// from `expected` (another worker won the race) or when
    /// `expected -> new` violates the monotonic lifecycle.
    fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError>;
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn create(&self, order: Order) -> Result<OrderId, StoreError> {
        (**self).create(order)
    }

    fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        (**self).get(id)
    }

    fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError> {
        (**self).update_status(id, expected, new)
    }
}

/// Read-side queries that don't fit the per-id contract.
#[async_trait::async_trait]
pub trait OrderQuery: Send + Sync {
    /// List the most recently created orders, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>, StoreError>;
}
