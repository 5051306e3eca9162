//! `new_order` event publication with retry.
//!
//! Ordering is persist-before-publish: the caller emits only after the
//! store create has committed, so a failed publish never loses the order;
//! the durable record remains and can be re-emitted. Transient publish
//! failures are retried here with exponential backoff and are never
//! surfaced to the API caller (the service layer logs exhaustion and moves
//! on).

use std::thread;

use tracing::{debug, warn};

use orderflow_core::OrderId;
use orderflow_events::{EventBus, NewOrderEvent};

use crate::tasks::RetryPolicy;

/// Publish error, reported only after the retry budget is spent.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Every attempt failed; the last error is included.
    #[error("publish retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Order event publisher.
///
/// Abstract so services stay decoupled from the concrete transport
/// (in-memory bus, broker, test double).
pub trait NewOrderPublisher: Send + Sync {
    /// Emit a `new_order` event for a durably created order.
    fn publish_new_order(&self, order_id: OrderId) -> Result<(), PublishError>;
}

impl<P> NewOrderPublisher for std::sync::Arc<P>
where
    P: NewOrderPublisher + ?Sized,
{
    fn publish_new_order(&self, order_id: OrderId) -> Result<(), PublishError> {
        (**self).publish_new_order(order_id)
    }
}

/// Bus-backed publisher with bounded exponential-backoff retry.
pub struct BusPublisher<B> {
    bus: B,
    retry_policy: RetryPolicy,
}

impl<B> BusPublisher<B>
where
    B: EventBus<NewOrderEvent>,
{
    /// Publisher with the default policy (5 attempts, exponential backoff).
    pub fn new(bus: B) -> Self {
        Self::with_retry_policy(bus, RetryPolicy::default())
    }

    pub fn with_retry_policy(bus: B, retry_policy: RetryPolicy) -> Self {
        Self { bus, retry_policy }
    }
}

impl<B> NewOrderPublisher for BusPublisher<B>
where
    B: EventBus<NewOrderEvent>,
{
    fn publish_new_order(&self, order_id: OrderId) -> Result<(), PublishError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.bus.publish(NewOrderEvent::new(order_id)) {
                Ok(()) => {
                    debug!(order_id = %order_id, attempt, "new_order event published");
                    return Ok(());
                }
                Err(e) => {
                    last_error = format!("{e:?}");
                    if attempt < max_attempts {
                        let delay = self.retry_policy.delay_for_attempt(attempt + 1);
                        warn!(
                            order_id = %order_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %last_error,
                            "publish failed, backing off"
                        );
                        thread::sleep(delay);
                    }
                }
            }
        }

        Err(PublishError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
