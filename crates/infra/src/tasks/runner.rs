//! Task runner: drives orders through their background state transition.

use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use orderflow_core::{Order, OrderStatus};

use crate::cache::OrderCache;
use crate::orders::Orders;
use crate::store::{OrderStore, StoreError};

use super::queue::TaskQueue;
use super::types::{ProcessTask, TaskResult, TaskStatus};

/// Order-processing handler. Must be idempotent: the runner may invoke it
/// again for the same order after a crash or a transient failure.
pub type TaskHandler = Box<dyn Fn(&Order) -> TaskResult + Send + Sync>;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct TaskRunnerConfig {
    /// How often to poll for ready tasks.
    pub poll_interval: Duration,
    /// Thread name for logging.
    pub name: String,
}

impl Default for TaskRunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            name: "task-runner".to_string(),
        }
    }
}

impl TaskRunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control a running task runner.
#[derive(Debug)]
pub struct TaskRunnerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RunnerStats>>,
}

impl TaskRunnerHandle {
    /// Request graceful shutdown and wait for the runner to stop.
    ///
    /// A task mid-execution runs to completion first; acknowledged work is
    /// never silently dropped.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }

    /// Current runner statistics.
    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap().clone()
    }
}

/// Runner runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunnerStats {
    pub tasks_processed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub tasks_dead_lettered: u64,
    /// Tasks completed as no-ops because the order was already terminal.
    pub duplicate_no_ops: u64,
    pub uptime_secs: u64,
}

/// Background task runner.
///
/// Polls the task queue and executes each claimed task:
///
/// 1. read the order; if already terminal, complete the task as a no-op
///    (guards against duplicate deliveries),
/// 2. move the order `created -> processing` via the store's conditional
///    update,
/// 3. run the handler,
/// 4. `Success` -> `completed`; `Fatal` -> `failed`; `Transient` ->
///    reschedule with backoff, dead-lettering (and failing the order) once
///    the retry budget is spent.
pub struct TaskRunner<S, C, Q> {
    queue: Q,
    orders: Orders<S, C>,
    handler: TaskHandler,
}

impl<S, C, Q> TaskRunner<S, C, Q>
where
    S: OrderStore + Send + Sync + 'static,
    C: OrderCache + Send + Sync + 'static,
    Q: TaskQueue + Send + Sync + 'static,
{
    pub fn new<F>(queue: Q, orders: Orders<S, C>, handler: F) -> Self
    where
        F: Fn(&Order) -> TaskResult + Send + Sync + 'static,
    {
        Self {
            queue,
            orders,
            handler: Box::new(handler),
        }
    }

    /// Spawn the runner in a background thread.
    pub fn spawn(self, config: TaskRunnerConfig) -> TaskRunnerHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(RunnerStats::default()));
        let stats_clone = stats.clone();

        let name = config.name.clone();
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || runner_loop(self, config, shutdown_rx, stats_clone))
            .expect("failed to spawn task runner thread");

        TaskRunnerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        }
    }

    /// Execute a single claimed task (tests and synchronous callers).
    ///
    /// Returns `Err` when the task did not complete this attempt; the task's
    /// own status says whether it will be retried or was dead-lettered.
    pub fn execute_one(&self, task: &mut ProcessTask) -> Result<(), String> {
        let outcome = self.process(task);
        self.settle(task, outcome)
    }

    /// Run the state transition for one claimed task.
    fn process(&self, task: &ProcessTask) -> TaskResult {
        let order = match self.orders.get_uncached(task.order_id) {
            Ok(order) => order,
            Err(StoreError::NotFound(id)) => {
                return TaskResult::Fatal(format!("order not found: {id}"));
            }
            Err(e) => return TaskResult::Transient(e.to_string()),
        };

        // Duplicate-delivery guard: an order that already reached a
        // terminal status must not be processed again.
        if order.status().is_terminal() {
            debug!(order_id = %order.id(), status = %order.status(), "order already terminal, no-op");
            return TaskResult::Success;
        }

        let order = match order.status() {
            OrderStatus::Created => {
                match self
                    .orders
                    .update_status(task.order_id, OrderStatus::Created, OrderStatus::Processing)
                {
                    Ok(order) => order,
                    // Lost the claim race. Re-read and decide: terminal
                    // means duplicate no-op, anything else retries later.
                    Err(StoreError::Conflict(_)) => {
                        match self.orders.get_uncached(task.order_id) {
                            Ok(o) if o.status().is_terminal() => return TaskResult::Success,
                            Ok(o) if o.status() == OrderStatus::Processing => o,
                            Ok(o) => {
                                return TaskResult::Transient(format!(
                                    "unexpected status {} after conflict",
                                    o.status()
                                ));
                            }
                            Err(e) => return TaskResult::Transient(e.to_string()),
                        }
                    }
                    Err(e) => return TaskResult::Transient(e.to_string()),
                }
            }
            // A previous run crashed after the dispatch transition; resume.
            OrderStatus::Processing => order,
            OrderStatus::Completed | OrderStatus::Failed => unreachable!("checked above"),
        };

        match (self.handler)(&order) {
            TaskResult::Success => {
                match self.orders.update_status(
                    order.id(),
                    OrderStatus::Processing,
                    OrderStatus::Completed,
                ) {
                    Ok(_) => TaskResult::Success,
                    Err(e) => TaskResult::Transient(format!("completing order: {e}")),
                }
            }
            TaskResult::Fatal(reason) => {
                if let Err(e) = self.orders.update_status(
                    order.id(),
                    OrderStatus::Processing,
                    OrderStatus::Failed,
                ) {
                    // Could not record the failure; retry the whole task.
                    return TaskResult::Transient(format!("failing order: {e}"));
                }
                TaskResult::Fatal(reason)
            }
            transient @ TaskResult::Transient(_) => transient,
        }
    }

    /// Apply the handler outcome to the task and the queue.
    fn settle(&self, task: &mut ProcessTask, outcome: TaskResult) -> Result<(), String> {
        match outcome {
            TaskResult::Success => {
                task.mark_completed();
                self.queue.update(task).map_err(|e| e.to_string())?;
                debug!(task_id = %task.id, order_id = %task.order_id, "task completed");
                Ok(())
            }
            TaskResult::Fatal(error) => {
                task.mark_dead(error.clone());
                self.queue
                    .dead_letter(task.clone(), error.clone())
                    .map_err(|e| e.to_string())?;
                warn!(task_id = %task.id, order_id = %task.order_id, error = %error, "task dead-lettered (fatal)");
                Err(error)
            }
            TaskResult::Transient(error) => {
                task.mark_failed(error.clone());

                if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                    // Retry budget spent: surface the failure on the order
                    // itself for manual inspection.
                    self.fail_order_after_exhaustion(task);
                    self.queue
                        .dead_letter(task.clone(), error.clone())
                        .map_err(|e| e.to_string())?;
                    warn!(
                        task_id = %task.id,
                        order_id = %task.order_id,
                        attempts = task.attempt,
                        error = %error,
                        "task dead-lettered (retries exhausted)"
                    );
                } else {
                    self.queue.update(task).map_err(|e| e.to_string())?;
                    debug!(
                        task_id = %task.id,
                        order_id = %task.order_id,
                        attempt = task.attempt,
                        error = %error,
                        "task failed, retry scheduled"
                    );
                }
                Err(error)
            }
        }
    }

    fn fail_order_after_exhaustion(&self, task: &ProcessTask) {
        let failed = match self.orders.get_uncached(task.order_id) {
            Ok(order) if order.status().is_terminal() => return,
            Ok(order) => self
                .orders
                .update_status(task.order_id, order.status(), OrderStatus::Failed),
            Err(e) => Err(e),
        };

        if let Err(e) = failed {
            error!(order_id = %task.order_id, error = %e, "could not mark order failed after retry exhaustion");
        }
    }
}

fn runner_loop<S, C, Q>(
    runner: TaskRunner<S, C, Q>,
    config: TaskRunnerConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<RunnerStats>>,
) where
    S: OrderStore + Send + Sync + 'static,
    C: OrderCache + Send + Sync + 'static,
    Q: TaskQueue + Send + Sync + 'static,
{
    info!(runner = %config.name, "task runner started");
    let start_time = Instant::now();

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        {
            let mut s = stats.lock().unwrap();
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match runner.queue.claim_next() {
            Ok(Some(mut task)) => {
                debug!(runner = %config.name, task_id = %task.id, order_id = %task.order_id, "claimed task");

                let was_terminal_order = matches!(
                    runner.orders.get_uncached(task.order_id).map(|o| o.status()),
                    Ok(s) if s.is_terminal()
                );

                let result = runner.execute_one(&mut task);

                let mut s = stats.lock().unwrap();
                s.tasks_processed += 1;
                match result {
                    Ok(()) if was_terminal_order => s.duplicate_no_ops += 1,
                    Ok(()) => s.tasks_succeeded += 1,
                    Err(_) => {
                        s.tasks_failed += 1;
                        if matches!(task.status, TaskStatus::DeadLettered { .. }) {
                            s.tasks_dead_lettered += 1;
                        }
                    }
                }
            }
            Ok(None) => {
                thread::sleep(config.poll_interval);
            }
            Err(e) => {
                error!(runner = %config.name, error = %e, "failed to claim task");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(runner = %config.name, "task runner stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cache::InMemoryOrderCache;
    use crate::store::InMemoryOrderStore;
    use crate::tasks::{InMemoryTaskQueue, RetryPolicy};
    use orderflow_core::Order;

    type TestRunner =
        TaskRunner<Arc<InMemoryOrderStore>, Arc<InMemoryOrderCache>, Arc<InMemoryTaskQueue>>;

    fn setup<F>(
        handler: F,
    ) -> (
        Arc<InMemoryOrderStore>,
        Arc<InMemoryTaskQueue>,
        TestRunner,
    )
    where
        F: Fn(&Order) -> TaskResult + Send + Sync + 'static,
    {
        let store = InMemoryOrderStore::arc();
        let cache = Arc::new(InMemoryOrderCache::new());
        let queue = InMemoryTaskQueue::arc();
        let orders = Orders::new(store.clone(), cache);
        let runner = TaskRunner::new(queue.clone(), orders, handler);
        (store, queue, runner)
    }

    #[test]
    fn successful_task_completes_the_order() {
        let (store, queue, runner) = setup(|_order| TaskResult::Success);

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        queue.enqueue(ProcessTask::new(id)).unwrap();

        let mut task = queue.claim_next().unwrap().unwrap();
        runner.execute_one(&mut task).unwrap();

        assert!(matches!(task.status, TaskStatus::Completed));
        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Completed);
    }

    #[test]
    fn fatal_error_fails_the_order_without_retry() {
        let (store, queue, runner) = setup(|_order| {
            TaskResult::Fatal("invalid order payload".to_string())
        });

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        queue.enqueue(ProcessTask::new(id)).unwrap();

        let mut task = queue.claim_next().unwrap().unwrap();
        assert!(runner.execute_one(&mut task).is_err());

        assert!(matches!(task.status, TaskStatus::DeadLettered { .. }));
        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Failed);
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
    }

    #[test]
    fn transient_errors_retry_then_succeed() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        // Fails twice, succeeds on the third attempt.
        let (store, queue, runner) = setup(move |_order| {
            if attempts_clone.fetch_add(1, Ordering::SeqCst) < 2 {
                TaskResult::Transient("store unavailable".to_string())
            } else {
                TaskResult::Success
            }
        });

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        queue.enqueue(
            ProcessTask::new(id)
                .with_retry_policy(RetryPolicy::fixed(5, Duration::from_millis(0))),
        )
        .unwrap();

        for _ in 0..2 {
            let mut task = queue.claim_next().unwrap().unwrap();
            assert!(runner.execute_one(&mut task).is_err());
            assert!(task.status.is_retriable());
        }

        let mut task = queue.claim_next().unwrap().unwrap();
        runner.execute_one(&mut task).unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Completed);
    }

    #[test]
    fn exhausted_retries_dead_letter_and_fail_the_order() {
        let (store, queue, runner) = setup(|_order| {
            TaskResult::Transient("broker down".to_string())
        });

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        queue.enqueue(
            ProcessTask::new(id)
                .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(0))),
        )
        .unwrap();

        for _ in 0..2 {
            let mut task = queue.claim_next().unwrap().unwrap();
            assert!(runner.execute_one(&mut task).is_err());
        }

        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Failed);
        assert_eq!(queue.dead_letters().unwrap().len(), 1);
        assert!(queue.claim_next().unwrap().is_none());
    }

    #[test]
    fn terminal_order_is_a_no_op() {
        let (store, queue, runner) = setup(|_order| {
            panic!("handler must not run for terminal orders")
        });

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        store
            .update_status(id, OrderStatus::Created, OrderStatus::Processing)
            .unwrap();
        store
            .update_status(id, OrderStatus::Processing, OrderStatus::Completed)
            .unwrap();

        queue.enqueue(ProcessTask::new(id)).unwrap();
        let mut task = queue.claim_next().unwrap().unwrap();
        runner.execute_one(&mut task).unwrap();

        assert!(matches!(task.status, TaskStatus::Completed));
        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Completed);
    }

    #[test]
    fn missing_order_is_fatal() {
        let (_store, queue, runner) = setup(|_order| TaskResult::Success);

        queue.enqueue(ProcessTask::new(orderflow_core::OrderId::new())).unwrap();
        let mut task = queue.claim_next().unwrap().unwrap();

        assert!(runner.execute_one(&mut task).is_err());
        assert!(matches!(task.status, TaskStatus::DeadLettered { .. }));
    }

    #[test]
    fn spawned_runner_processes_until_shutdown() {
        let (store, queue, runner) = setup(|_order| TaskResult::Success);

        let id = store.create(Order::new(serde_json::json!({}))).unwrap();
        queue.enqueue(ProcessTask::new(id)).unwrap();

        let handle = runner.spawn(
            TaskRunnerConfig::default()
                .with_name("test-runner")
                .with_poll_interval(Duration::from_millis(5)),
        );

        // Wait for the order to reach a terminal status.
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if store.get(id).unwrap().status().is_terminal() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let stats = handle.stats();
        handle.shutdown();

        assert_eq!(store.get(id).unwrap().status(), OrderStatus::Completed);
        assert!(stats.tasks_processed >= 1);
    }
}
