//! Order entity and status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::OrderId;

/// Order status lifecycle.
///
/// Transitions are monotonic forward:
///
/// ```text
/// created --> processing --> completed
///    |             |
///    |             +-------> failed
///    +---------------------> failed   (direct failure before dispatch)
/// ```
///
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Whether this status accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Created, OrderStatus::Processing) => true,
            (OrderStatus::Created, OrderStatus::Failed) => true,
            (OrderStatus::Processing, OrderStatus::Completed) => true,
            (OrderStatus::Processing, OrderStatus::Failed) => true,
            _ => false,
        }
    }

    /// Stable wire name for the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order: the source-of-truth record behind the pipeline.
///
/// Created once, mutated only through [`Order::transition_to`] (status
/// updates); the payload is opaque business data and never reinterpreted
/// here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    status: OrderStatus,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Create a new order in `created` status with a fresh id.
    pub fn new(payload: serde_json::Value) -> Self {
        Self::with_id(OrderId::new(), payload)
    }

    /// Create a new order with an explicit id (tests, idempotent callers).
    pub fn with_id(id: OrderId, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrderStatus::Created,
            payload,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move the order to `next`, enforcing the monotonic lifecycle.
    pub fn transition_to(&mut self, next: OrderStatus) -> DomainResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::conflict(format!(
                "invalid status transition: {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Rehydrate an order from stored fields (store implementations only).
    pub fn from_parts(
        id: OrderId,
        status: OrderStatus,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status,
            payload,
            created_at,
            updated_at,
        }
    }
}
