//! Core task types and retry policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use orderflow_core::OrderId;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting to be picked up.
    Pending,
    /// Currently being executed.
    Running,
    /// Completed successfully (or skipped because the order was already
    /// terminal).
    Completed,
    /// Failed transiently, will be retried after backoff.
    Failed { error: String, attempt: u32 },
    /// Exhausted retries or hit a fatal error; moved to the DLQ.
    DeadLettered { error: String, attempts: u32 },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::DeadLettered { .. })
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. })
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed,
    /// Exponential backoff: base * 2^(attempt-1).
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = never run; 1 = no retries).
    pub max_attempts: u32,
    /// Base delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Backoff strategy.
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Policy with exponential backoff.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Calculate delay before the given attempt number (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.base_delay.min(self.max_delay);
        }

        match self.strategy {
            BackoffStrategy::Fixed => self.base_delay.min(self.max_delay),
            BackoffStrategy::Exponential => {
                let base_ms = self.base_delay.as_millis() as f64;
                let max_ms = self.max_delay.as_millis() as f64;
                let exp = 2_f64.powi((attempt - 1) as i32);
                Duration::from_millis((base_ms * exp).min(max_ms) as u64)
            }
        }
    }

    /// Check if more attempts are allowed after `attempt` completed ones.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// A unit of background work: process one order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessTask {
    /// Unique task id.
    pub id: TaskId,
    /// The order this task processes; also the deduplication key.
    pub order_id: OrderId,
    /// Current status.
    pub status: TaskStatus,
    /// Retry policy.
    pub retry_policy: RetryPolicy,
    /// Current attempt number (starts at 0, incremented on claim).
    pub attempt: u32,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
    /// Earliest time the task may run again (set by retry backoff).
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl ProcessTask {
    pub fn new(order_id: OrderId) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            order_id,
            status: TaskStatus::Pending,
            retry_policy: RetryPolicy::default(),
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
        }
    }

    /// Set a custom retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Check if the task is ready to execute.
    pub fn is_ready(&self) -> bool {
        match self.scheduled_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    /// Mark the task as running and count the attempt.
    pub fn mark_running(&mut self) {
        self.status = TaskStatus::Running;
        self.attempt += 1;
        self.updated_at = Utc::now();
    }

    /// Mark the task as completed.
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.updated_at = Utc::now();
    }

    /// Record a transient failure: schedule a backoff retry while the
    /// budget lasts, dead-letter once it is spent.
    pub fn mark_failed(&mut self, error: String) {
        let now = Utc::now();
        self.updated_at = now;

        if self.retry_policy.should_retry(self.attempt) {
            let delay = self.retry_policy.delay_for_attempt(self.attempt + 1);
            self.scheduled_at =
                Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            self.status = TaskStatus::Failed {
                error,
                attempt: self.attempt,
            };
        } else {
            self.status = TaskStatus::DeadLettered {
                error,
                attempts: self.attempt,
            };
        }
    }

    /// Record a fatal failure: straight to the DLQ, no retry.
    pub fn mark_dead(&mut self, error: String) {
        self.status = TaskStatus::DeadLettered {
            error,
            attempts: self.attempt,
        };
        self.updated_at = Utc::now();
    }
}

/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// Processing succeeded; the order moves to `completed`.
    Success,
    /// Transient infrastructure error; retry with backoff.
    Transient(String),
    /// Unrecoverable business error; the order moves to `failed`.
    Fatal(String),
}

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: ProcessTask,
    pub dead_lettered_at: DateTime<Utc>,
    pub reason: String,
}

impl DeadLetterEntry {
    pub fn new(task: ProcessTask, reason: String) -> Self {
        Self {
            task,
            dead_lettered_at: Utc::now(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let policy = RetryPolicy::exponential(
            5,
            Duration::from_millis(100),
            Duration::from_secs(10),
        );

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_backoff_respects_the_cap() {
        let policy = RetryPolicy::exponential(
            10,
            Duration::from_millis(100),
            Duration::from_millis(300),
        );

        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(300));
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(500));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..Default::default()
        };

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn task_lifecycle() {
        let mut task = ProcessTask::new(OrderId::new());
        assert!(matches!(task.status, TaskStatus::Pending));
        assert_eq!(task.attempt, 0);

        task.mark_running();
        assert!(matches!(task.status, TaskStatus::Running));
        assert_eq!(task.attempt, 1);

        task.mark_completed();
        assert!(task.status.is_terminal());
    }

    #[test]
    fn transient_failures_retry_then_dead_letter() {
        let mut task = ProcessTask::new(OrderId::new())
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                ..Default::default()
            });

        task.mark_running();
        task.mark_failed("broker hiccup".to_string());
        assert!(task.status.is_retriable());
        assert!(task.scheduled_at.is_some());

        task.mark_running();
        task.mark_failed("broker hiccup".to_string());
        assert!(matches!(task.status, TaskStatus::DeadLettered { .. }));
    }

    #[test]
    fn fatal_failure_skips_retries() {
        let mut task = ProcessTask::new(OrderId::new());
        task.mark_running();
        task.mark_dead("invalid order payload".to_string());
        assert!(matches!(
            task.status,
            TaskStatus::DeadLettered { attempts: 1, .. }
        ));
    }
}
