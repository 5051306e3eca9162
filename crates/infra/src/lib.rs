//! Infrastructure layer: order store, cache, event pipeline, task runner.

pub mod cache;
pub mod consumer;
pub mod orders;
pub mod publisher;
pub mod service;
pub mod store;
pub mod tasks;


pub use cache::{CacheError, InMemoryOrderCache, OrderCache};
pub use consumer::{ConsumerConfig, NewOrderConsumer};
pub use orders::Orders;
pub use publisher::{BusPublisher, NewOrderPublisher, PublishError};
pub use service::OrderService;
pub use store::{InMemoryOrderStore, OrderQuery, OrderStore, StoreError};
pub use tasks::{
    InMemoryTaskQueue, ProcessTask, RetryPolicy, TaskQueue, TaskQueueError, TaskResult, TaskRunner,
    TaskStatus,
};
