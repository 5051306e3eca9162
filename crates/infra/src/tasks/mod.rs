//! Background order processing: task types, dedup queue, polling runner.
//!
//! One task per order. The queue deduplicates on `order_id` (at-most-once
//! enqueue per order no matter how many times the `new_order` event is
//! delivered); the runner drives the order through
//! `created -> processing -> completed | failed` with bounded retries and a
//! dead-letter queue for exhausted tasks.

pub mod queue;
pub mod runner;
pub mod types;

pub use queue::{InMemoryTaskQueue, QueueStats, TaskQueue, TaskQueueError};
pub use runner::{RunnerStats, TaskHandler, TaskRunner, TaskRunnerConfig, TaskRunnerHandle};
pub use types::{
    BackoffStrategy, DeadLetterEntry, ProcessTask, RetryPolicy, TaskId, TaskResult, TaskStatus,
};
