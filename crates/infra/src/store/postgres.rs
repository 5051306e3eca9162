//! Postgres-backed order store.
//!
//! The conditional status update is pushed down to the database:
//! `UPDATE orders SET status = $new WHERE id = $id AND status = $expected`.
//! If another worker commits between our read and our update, the WHERE
//! clause matches zero rows and the call reports a conflict instead of
//! clobbering the newer status.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | StoreError | Scenario |
//! |------------|---------------|------------|----------|
//! | Database (unique violation) | `23505` | `DuplicateKey` | Id collision on create |
//! | Database (other) | any other | `Storage` | Constraint/data errors |
//! | PoolTimedOut / Io / PoolClosed | n/a | `Unavailable` | Backend unreachable (retryable) |
//! | RowNotFound | n/a | `NotFound` | Unknown order id |
//!
//! ## Thread safety
//!
//! `PostgresOrderStore` is `Send + Sync`; all operations go through the
//! SQLx connection pool.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::instrument;

use orderflow_core::{Order, OrderId, OrderStatus};

use super::{OrderQuery, OrderStore, StoreError};

/// Postgres-backed order store.
#[derive(Debug, Clone)]
pub struct PostgresOrderStore {
    pool: Arc<PgPool>,
}

impl PostgresOrderStore {
    /// Create a new store with the given connection pool.
    ///
    /// Expects the `orders` table:
    ///
    /// ```sql
    /// CREATE TABLE IF NOT EXISTS orders (
    ///     id         UUID PRIMARY KEY,
    ///     status     TEXT NOT NULL,
    ///     payload    JSONB NOT NULL,
    ///     created_at TIMESTAMPTZ NOT NULL,
    ///     updated_at TIMESTAMPTZ NOT NULL
    /// );
    /// ```
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Persist a new order.
    #[instrument(skip(self, order), fields(order_id = %order.id()), err)]
    pub async fn insert_order(&self, order: &Order) -> Result<OrderId, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, status, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.payload())
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(order.id(), e))?;

        Ok(order.id())
    }

    /// Load an order by id.
    #[instrument(skip(self), fields(order_id = %id), err)]
    pub async fn fetch_order(&self, id: OrderId) -> Result<Order, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, payload, created_at, updated_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(id, e))?;

        match row {
            Some(row) => decode_order(&row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    /// Conditionally advance an order's status.
    #[instrument(skip(self), fields(order_id = %id, expected = %expected, new = %new), err)]
    pub async fn update_order_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError> {
        // Reject lifecycle violations before touching the database.
        if !expected.can_transition_to(new) {
            return Err(StoreError::Conflict(format!(
                "invalid status transition: {expected} -> {new}"
            )));
        }

        let row = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING id, status, payload, created_at, updated_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(new.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(id, e))?;

        if let Some(row) = row {
            return decode_order(&row);
        }

        // Zero rows matched: either the id is unknown or another worker
        // moved the status first. Disambiguate with a plain read.
        let current = self.fetch_order(id).await?;
        Err(StoreError::Conflict(format!(
            "expected status {expected}, found {}",
            current.status()
        )))
    }

    fn runtime_handle() -> Result<tokio::runtime::Handle, StoreError> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            StoreError::Unavailable(
                "PostgresOrderStore requires a tokio runtime context".to_string(),
            )
        })
    }
}

// The OrderStore trait is synchronous, but Postgres operations require
// async. Bridge through the ambient tokio runtime, as callers (workers)
// run on plain threads inside a runtime-owning process.

impl OrderStore for PostgresOrderStore {
    fn create(&self, order: Order) -> Result<OrderId, StoreError> {
        let handle = Self::runtime_handle()?;
        handle.block_on(self.insert_order(&order))
    }

    fn get(&self, id: OrderId) -> Result<Order, StoreError> {
        let handle = Self::runtime_handle()?;
        handle.block_on(self.fetch_order(id))
    }

    fn update_status(
        &self,
        id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<Order, StoreError> {
        let handle = Self::runtime_handle()?;
        handle.block_on(self.update_order_status(id, expected, new))
    }
}

#[async_trait::async_trait]
impl OrderQuery for PostgresOrderStore {
    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, payload, created_at, updated_at
            FROM orders
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("list_recent: {e}")))?;

        rows.iter().map(decode_order).collect()
    }
}

fn decode_order(row: &sqlx::postgres::PgRow) -> Result<Order, StoreError> {
    let id: uuid::Uuid = row
        .try_get("id")
        .map_err(|e| StoreError::Storage(format!("orders.id: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::Storage(format!("orders.status: {e}")))?;
    let payload: serde_json::Value = row
        .try_get("payload")
        .map_err(|e| StoreError::Storage(format!("orders.payload: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Storage(format!("orders.created_at: {e}")))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| StoreError::Storage(format!("orders.updated_at: {e}")))?;

    let status: OrderStatus = status
        .parse()
        .map_err(|e| StoreError::Storage(format!("orders.status: {e:?}")))?;

    Ok(Order::from_parts(
        OrderId::from_uuid(id),
        status,
        payload,
        created_at,
        updated_at,
    ))
}

fn map_sqlx_error(id: OrderId, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some("23505") {
                StoreError::DuplicateKey(id)
            } else {
                StoreError::Storage(db.to_string())
            }
        }
        sqlx::Error::RowNotFound => StoreError::NotFound(id),
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(e.to_string())
        }
        _ => StoreError::Storage(e.to_string()),
    }
}
