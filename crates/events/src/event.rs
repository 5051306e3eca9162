use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::OrderId;

/// A broker-bound event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - produced **once** per business occurrence
/// - delivered **at-least-once** (consumers must be idempotent)
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "new_order").
    fn event_type(&self) -> &'static str;

    /// When the event was emitted (business time).
    fn emitted_at(&self) -> DateTime<Utc>;
}

/// Wire name of the order-creation event.
pub const NEW_ORDER_EVENT: &str = "new_order";

/// Fact: an order was durably created.
///
/// Emitted once per creation, after the store commit (persist-before-publish).
/// The payload carries only the order id; consumers read the order from the
/// store, never from the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderEvent {
    order_id: OrderId,
    emitted_at: DateTime<Utc>,
}

impl NewOrderEvent {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id,
            emitted_at: Utc::now(),
        }
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }
}

impl Event for NewOrderEvent {
    fn event_type(&self) -> &'static str {
        NEW_ORDER_EVENT
    }

    fn emitted_at(&self) -> DateTime<Utc> {
        self.emitted_at
    }
}
