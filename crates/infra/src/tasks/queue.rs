//! Task queue implementations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use orderflow_core::OrderId;

use super::types::{DeadLetterEntry, ProcessTask, TaskId, TaskStatus};

/// Task queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskQueueError {
    /// A task for this order was already enqueued at some point; the
    /// duplicate enqueue is a no-op for the caller (idempotent consume).
    #[error("task already enqueued for order {0}")]
    Duplicate(OrderId),

    /// The queue is at capacity; the caller should back off and retry.
    #[error("task queue saturated (capacity {0})")]
    Saturated(usize),

    /// Unknown task id.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Internal storage failure.
    #[error("queue storage error: {0}")]
    Storage(String),
}

/// Queue statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

/// Task queue abstraction.
///
/// `enqueue` is keyed by `order_id`: the queue remembers every order it has
/// ever accepted and rejects re-enqueues as [`TaskQueueError::Duplicate`].
/// This is what turns the broker's at-least-once delivery into at-most-once
/// processing per order.
pub trait TaskQueue: Send + Sync {
    /// Enqueue a processing task for an order.
    fn enqueue(&self, task: ProcessTask) -> Result<TaskId, TaskQueueError>;

    /// Claim the next pending task that is ready to execute, marking it
    /// running. Returns `None` when nothing is ready.
    fn claim_next(&self) -> Result<Option<ProcessTask>, TaskQueueError>;

    /// Persist an updated task.
    fn update(&self, task: &ProcessTask) -> Result<(), TaskQueueError>;

    /// Get a task by id.
    fn get(&self, id: TaskId) -> Result<Option<ProcessTask>, TaskQueueError>;

    /// Move a task to the dead-letter queue.
    fn dead_letter(&self, task: ProcessTask, reason: String) -> Result<(), TaskQueueError>;

    /// List dead-lettered tasks (for manual inspection).
    fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskQueueError>;

    /// Queue statistics.
    fn stats(&self) -> Result<QueueStats, TaskQueueError>;
}

impl<Q> TaskQueue for Arc<Q>
where
    Q: TaskQueue + ?Sized,
{
    fn enqueue(&self, task: ProcessTask) -> Result<TaskId, TaskQueueError> {
        (**self).enqueue(task)
    }

    fn claim_next(&self) -> Result<Option<ProcessTask>, TaskQueueError> {
        (**self).claim_next()
    }

    fn update(&self, task: &ProcessTask) -> Result<(), TaskQueueError> {
        (**self).update(task)
    }

    fn get(&self, id: TaskId) -> Result<Option<ProcessTask>, TaskQueueError> {
        (**self).get(id)
    }

    fn dead_letter(&self, task: ProcessTask, reason: String) -> Result<(), TaskQueueError> {
        (**self).dead_letter(task, reason)
    }

    fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskQueueError> {
        (**self).dead_letters()
    }

    fn stats(&self) -> Result<QueueStats, TaskQueueError> {
        (**self).stats()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: HashMap<TaskId, ProcessTask>,
    /// Every order ever accepted. Kept for the queue's lifetime so a
    /// redelivered event after completion is still rejected as a duplicate.
    seen_orders: HashSet<OrderId>,
    dead_letters: Vec<DeadLetterEntry>,
}

/// In-memory bounded task queue with per-order deduplication.
#[derive(Debug)]
pub struct InMemoryTaskQueue {
    state: RwLock<QueueState>,
    capacity: usize,
}

const DEFAULT_CAPACITY: usize = 1024;

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Queue with a custom bound on live (pending + running + retrying)
    /// tasks. Enqueues beyond the bound report saturation so the consumer
    /// can apply backpressure.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: RwLock::new(QueueState::default()),
            capacity,
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, QueueState>, TaskQueueError> {
        self.state
            .write()
            .map_err(|_| TaskQueueError::Storage("lock poisoned".to_string()))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, QueueState>, TaskQueueError> {
        self.state
            .read()
            .map_err(|_| TaskQueueError::Storage("lock poisoned".to_string()))
    }
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for InMemoryTaskQueue {
    fn enqueue(&self, task: ProcessTask) -> Result<TaskId, TaskQueueError> {
        let mut state = self.write()?;

        if state.seen_orders.contains(&task.order_id) {
            return Err(TaskQueueError::Duplicate(task.order_id));
        }

        let live = state
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .count();
        if live >= self.capacity {
            return Err(TaskQueueError::Saturated(self.capacity));
        }

        let id = task.id;
        state.seen_orders.insert(task.order_id);
        state.tasks.insert(id, task);
        Ok(id)
    }

    fn claim_next(&self) -> Result<Option<ProcessTask>, TaskQueueError> {
        let mut state = self.write()?;

        // Oldest ready task first (FIFO per creation time).
        let next_id = {
            let mut candidates: Vec<_> = state
                .tasks
                .values()
                .filter(|t| {
                    matches!(t.status, TaskStatus::Pending | TaskStatus::Failed { .. })
                        && t.is_ready()
                })
                .collect();
            candidates.sort_by_key(|t| t.created_at);
            candidates.first().map(|t| t.id)
        };

        if let Some(id) = next_id {
            if let Some(task) = state.tasks.get_mut(&id) {
                task.mark_running();
                return Ok(Some(task.clone()));
            }
        }

        Ok(None)
    }

    fn update(&self, task: &ProcessTask) -> Result<(), TaskQueueError> {
        let mut state = self.write()?;
        if !state.tasks.contains_key(&task.id) {
            return Err(TaskQueueError::NotFound(task.id));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    fn get(&self, id: TaskId) -> Result<Option<ProcessTask>, TaskQueueError> {
        Ok(self.read()?.tasks.get(&id).cloned())
    }

    fn dead_letter(&self, mut task: ProcessTask, reason: String) -> Result<(), TaskQueueError> {
        let mut state = self.write()?;

        if !matches!(task.status, TaskStatus::DeadLettered { .. }) {
            task.mark_dead(reason.clone());
        }

        state.tasks.remove(&task.id);
        state.dead_letters.push(DeadLetterEntry::new(task, reason));
        Ok(())
    }

    fn dead_letters(&self) -> Result<Vec<DeadLetterEntry>, TaskQueueError> {
        Ok(self.read()?.dead_letters.clone())
    }

    fn stats(&self) -> Result<QueueStats, TaskQueueError> {
        let state = self.read()?;
        let mut stats = QueueStats::default();

        for task in state.tasks.values() {
            match &task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed { .. } => stats.failed += 1,
                TaskStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }
        stats.dead_lettered += state.dead_letters.len();

        Ok(stats)
    }
}
