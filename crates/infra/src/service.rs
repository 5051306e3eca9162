//! Order intake service.
//!
//! The entry point for creating and reading orders. `submit` is
//! persist-before-publish: the order is durable before the `new_order`
//! event goes out, and a publish failure never fails the submission. The
//! caller gets the created order back either way.

use tracing::{error, info};

use orderflow_core::{Order, OrderId};

use crate::cache::OrderCache;
use crate::orders::Orders;
use crate::publisher::NewOrderPublisher;
use crate::store::{OrderStore, StoreError};

/// Order creation and lookup over the repository and publisher.
pub struct OrderService<S, C, P> {
    orders: Orders<S, C>,
    publisher: P,
}

impl<S, C, P> OrderService<S, C, P>
where
    S: OrderStore,
    C: OrderCache,
    P: NewOrderPublisher,
{
    pub fn new(orders: Orders<S, C>, publisher: P) -> Self {
        Self { orders, publisher }
    }

    /// Create an order from the given payload and announce it.
    ///
    /// The store write is the commit point. The publish happens after and
    /// its failure is logged but not propagated; the durable record can be
    /// re-emitted later.
    pub fn submit(&self, payload: serde_json::Value) -> Result<Order, StoreError> {
        let order = self.orders.create(Order::new(payload))?;
        info!(order_id = %order.id(), "order submitted");

        if let Err(err) = self.publisher.publish_new_order(order.id()) {
            error!(
                order_id = %order.id(),
                error = %err,
                "new_order publish failed after durable create"
            );
        }

        Ok(order)
    }

    /// Read an order by id (cache-aside).
    pub fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        self.orders.get(id)
    }
}
