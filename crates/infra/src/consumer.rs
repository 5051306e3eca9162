//! `new_order` event consumer.
//!
//! Bridges the event bus to the task queue: each delivered event becomes at
//! most one [`ProcessTask`]. Delivery is at-least-once, so redelivered
//! events are expected; the queue's order-id dedup makes the duplicate
//! enqueue a no-op.
//!
//! Backpressure: when the queue reports saturation the consumer holds the
//! event and retries the same enqueue after a pause, instead of dropping it.

use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use orderflow_events::{EventBus, NewOrderEvent, Subscription};

use crate::tasks::{ProcessTask, RetryPolicy, TaskQueue, TaskQueueError};

/// Consumer worker configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// How often the loop wakes to check for shutdown while idle.
    pub poll_interval: Duration,
    /// Pause before retrying an enqueue rejected for saturation.
    pub saturation_backoff: Duration,
    /// Retry policy stamped onto enqueued tasks.
    pub retry_policy: RetryPolicy,
    /// Worker name used in logs.
    pub name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            saturation_backoff: Duration::from_millis(50),
            retry_policy: RetryPolicy::default(),
            name: "new-order-consumer".to_string(),
        }
    }
}

impl ConsumerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_saturation_backoff(mut self, backoff: Duration) -> Self {
        self.saturation_backoff = backoff;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Background worker that turns `new_order` events into queued tasks.
///
/// Owns a bus subscription and a worker thread. Dropping the handle without
/// calling [`NewOrderConsumer::shutdown`] detaches the thread.
pub struct NewOrderConsumer {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
    name: String,
}

impl NewOrderConsumer {
    /// Subscribe to `bus` and start consuming with the default config.
    pub fn spawn<B, Q>(bus: &B, queue: Q) -> Self
    where
        B: EventBus<NewOrderEvent>,
        Q: TaskQueue + Send + Sync + 'static,
    {
        Self::spawn_with_config(bus, queue, ConsumerConfig::default())
    }

    pub fn spawn_with_config<B, Q>(bus: &B, queue: Q, config: ConsumerConfig) -> Self
    where
        B: EventBus<NewOrderEvent>,
        Q: TaskQueue + Send + Sync + 'static,
    {
        let subscription = bus.subscribe();
        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let name = config.name.clone();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                info!(worker = %thread_name, "consumer started");
                consumer_loop(subscription, queue, config, shutdown_rx);
                info!(worker = %thread_name, "consumer stopped");
            })
            .expect("failed to spawn consumer thread");

        Self {
            shutdown: shutdown_tx,
            join: Some(join),
            name,
        }
    }

    /// Signal the worker to stop and wait for it to exit.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(worker = %self.name, "consumer thread panicked");
            }
        }
    }
}

fn consumer_loop<Q>(
    subscription: Subscription<NewOrderEvent>,
    queue: Q,
    config: ConsumerConfig,
    shutdown: mpsc::Receiver<()>,
) where
    Q: TaskQueue,
{
    loop {
        match shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => {}
        }

        let event = match subscription.recv_timeout(config.poll_interval) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("event bus closed, consumer exiting");
                return;
            }
        };

        if !handle_event(&queue, &config, &shutdown, event) {
            return;
        }
    }
}

/// Enqueue a task for the event, holding it through saturation.
///
/// Returns `false` when shutdown was requested mid-backoff.
fn handle_event<Q>(
    queue: &Q,
    config: &ConsumerConfig,
    shutdown: &mpsc::Receiver<()>,
    event: NewOrderEvent,
) -> bool
where
    Q: TaskQueue,
{
    let order_id = event.order_id();
    let task = ProcessTask::new(order_id).with_retry_policy(config.retry_policy.clone());

    loop {
        match queue.enqueue(task.clone()) {
            Ok(task_id) => {
                debug!(order_id = %order_id, task_id = %task_id, "task enqueued");
                return true;
            }
            Err(TaskQueueError::Duplicate(_)) => {
                debug!(order_id = %order_id, "duplicate delivery, task already enqueued");
                return true;
            }
            Err(TaskQueueError::Saturated(capacity)) => {
                warn!(
                    order_id = %order_id,
                    capacity,
                    backoff_ms = config.saturation_backoff.as_millis() as u64,
                    "task queue saturated, holding event"
                );
                match shutdown.recv_timeout(config.saturation_backoff) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return false,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
            Err(e) => {
                // The order is durable; a dropped event can be re-emitted.
                error!(order_id = %order_id, error = %e, "enqueue failed, dropping event");
                return true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::tasks::InMemoryTaskQueue;
    use orderflow_core::OrderId;
    use orderflow_events::InMemoryEventBus;

    fn test_config() -> ConsumerConfig {
        ConsumerConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_saturation_backoff(Duration::from_millis(10))
    }

    fn wait_for<F: Fn() -> bool>(condition: F) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn enqueues_task_per_event() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let consumer = NewOrderConsumer::spawn_with_config(&bus, queue.clone(), test_config());

        let order_id = OrderId::new();
        bus.publish(NewOrderEvent::new(order_id)).unwrap();

        wait_for(|| queue.stats().unwrap().pending == 1);
        consumer.shutdown();

        let task = queue.claim_next().unwrap().unwrap();
        assert_eq!(task.order_id, order_id);
    }

    #[test]
    fn redelivered_event_is_a_no_op() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let consumer = NewOrderConsumer::spawn_with_config(&bus, queue.clone(), test_config());

        let order_id = OrderId::new();
        bus.publish(NewOrderEvent::new(order_id)).unwrap();
        bus.publish(NewOrderEvent::new(order_id)).unwrap();
        bus.publish(NewOrderEvent::new(order_id)).unwrap();

        // A second, distinct order proves all three deliveries were consumed.
        let other = OrderId::new();
        bus.publish(NewOrderEvent::new(other)).unwrap();

        wait_for(|| queue.stats().unwrap().pending == 2);
        consumer.shutdown();

        assert_eq!(queue.stats().unwrap().pending, 2);
    }

    #[test]
    fn holds_event_through_saturation() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = Arc::new(InMemoryTaskQueue::with_capacity(1));
        let consumer = NewOrderConsumer::spawn_with_config(&bus, queue.clone(), test_config());

        let first = OrderId::new();
        let second = OrderId::new();
        bus.publish(NewOrderEvent::new(first)).unwrap();
        bus.publish(NewOrderEvent::new(second)).unwrap();

        wait_for(|| queue.stats().unwrap().pending == 1);

        // Drain the queue; the held second event should now land.
        let mut task = queue.claim_next().unwrap().unwrap();
        assert_eq!(task.order_id, first);
        task.mark_completed();
        queue.update(&task).unwrap();

        wait_for(|| queue.stats().unwrap().pending == 1);
        consumer.shutdown();

        let next = queue.claim_next().unwrap().unwrap();
        assert_eq!(next.order_id, second);
    }

    #[test]
    fn shutdown_stops_the_worker() {
        let bus = Arc::new(InMemoryEventBus::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let consumer = NewOrderConsumer::spawn_with_config(&bus, queue.clone(), test_config());

        consumer.shutdown();

        bus.publish(NewOrderEvent::new(OrderId::new())).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.stats().unwrap().pending, 0);
    }
}
