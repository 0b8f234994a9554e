//! `herald-events`: job outcome events and the bus that fans them out.

pub mod bus;
pub mod in_memory_bus;
pub mod job_event;

pub use bus::{EventBus, EventFilter, Subscription};
pub use in_memory_bus::{DEFAULT_CAPACITY, InMemoryBusError, InMemoryEventBus};
pub use job_event::{EventKind, JobEvent};
