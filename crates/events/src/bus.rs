//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is the **transport** between the order-creation path and the
//! background pipeline. It is intentionally lightweight:
//!
//! - **Transport-agnostic**: in-memory channels here, a broker in production.
//! - **At-least-once delivery**: events may arrive more than once; the
//!   consumer side deduplicates on `order_id`.
//! - **No persistence**: the order store is the source of truth. Events are
//!   published only after the store commit, so a failed publish never loses
//!   data; the order record survives and can be re-emitted.

use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

/// A subscription to an event stream.
///
/// Each subscription gets a copy of every event published to the bus
/// (broadcast semantics). Designed for single-threaded consumption; a worker
/// owns its subscription and polls it with [`Subscription::recv_timeout`] so
/// it can interleave shutdown checks.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Pub/sub bus for pipeline events.
///
/// `publish()` can fail (broker unavailable, bus full). Failures surface to
/// the caller; the publisher layer retries with backoff because the order
/// is already durable and re-publishing is safe.
///
/// Implementations must be `Send + Sync`; multiple threads publish
/// concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
