//! `herald-core`: the job record and its lifecycle rules.
//!
//! This crate contains **pure domain** primitives (no storage, no IO). The
//! queue, retry coordinator and dead-letter store live in `herald-infra`.

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{Job, JobBuilder, Payload, DEFAULT_MAX_ATTEMPTS, NOTIFICATION_KIND};
