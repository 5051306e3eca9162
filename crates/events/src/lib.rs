//! Integration events and the pub/sub transport between pipeline stages.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{Event, NewOrderEvent, NEW_ORDER_EVENT};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
