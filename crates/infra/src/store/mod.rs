//! Durable list store boundary.
//!
//! The queue, the dead-letter store and the retry schedule never touch a
//! backend directly; they go through the primitives defined here. All
//! atomicity the subsystem relies on (single-claimant pop, remove-by-value,
//! scheduled-entry claim) is delegated to the backend.

#[cfg(test)]
pub(crate) mod faulty;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod r#trait;

pub use in_memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use r#trait::{ListStore, ScheduleStore, StoreError, StoreResult};
