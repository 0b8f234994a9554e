//! Infrastructure layer: list stores, the job queue, retries, dead letters,
//! workers, and configuration.

pub mod config;
pub mod jobs;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, QueueConfig};
pub use jobs::{JobQueue, JobSystem, QueueError, QueueStats};
pub use store::{InMemoryStore, ListStore, ScheduleStore, StoreError};
