use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure of a store primitive.
///
/// These are never swallowed: they threaten the reliability of the whole
/// queue and must reach the operator through logs or stats.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Double-ended list primitives (one list per key).
///
/// Index 0 is the head, i.e. the most recently pushed value. Values are
/// consumed from the tail, which gives FIFO delivery.
pub trait ListStore: Send + Sync {
    /// Push `value` at the head. Returns the new list length.
    fn push_head(&self, key: &str, value: &str) -> StoreResult<u64>;

    /// Remove and return the oldest value, waiting up to `timeout` for one
    /// to appear. `Ok(None)` means the timeout elapsed.
    ///
    /// A value is handed to exactly one caller even when many block on the
    /// same key concurrently.
    fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    fn length(&self, key: &str) -> StoreResult<u64>;

    /// Non-destructive read of `start..=stop`. Negative indexes count from
    /// the tail (`-1` is the last element).
    fn range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>>;

    /// Remove up to `count` values equal to `value`, scanning from the head.
    /// Returns how many were removed.
    fn remove_value(&self, key: &str, count: u64, value: &str) -> StoreResult<u64>;
}

/// Timestamp-ordered index (one index per key).
///
/// Backs the persisted retry schedule: members are serialized jobs, scores are
/// ready-at times in epoch milliseconds.
pub trait ScheduleStore: Send + Sync {
    /// Insert `member` (or move it) to `ready_at_ms`.
    fn schedule(&self, key: &str, member: &str, ready_at_ms: i64) -> StoreResult<()>;

    /// Members with `score <= now_ms`, earliest first, at most `limit`.
    fn due(&self, key: &str, now_ms: i64, limit: usize) -> StoreResult<Vec<String>>;

    /// Remove `member`. Returns `true` only for the single caller that
    /// actually removed it.
    fn claim(&self, key: &str, member: &str) -> StoreResult<bool>;

    fn scheduled_len(&self, key: &str) -> StoreResult<u64>;
}

impl<S> ListStore for Arc<S>
where
    S: ListStore + ?Sized,
{
    fn push_head(&self, key: &str, value: &str) -> StoreResult<u64> {
        (**self).push_head(key, value)
    }

    fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        (**self).pop_tail_blocking(key, timeout)
    }

    fn length(&self, key: &str) -> StoreResult<u64> {
        (**self).length(key)
    }

    fn range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        (**self).range(key, start, stop)
    }

    fn remove_value(&self, key: &str, count: u64, value: &str) -> StoreResult<u64> {
        (**self).remove_value(key, count, value)
    }
}

impl<S> ScheduleStore for Arc<S>
where
    S: ScheduleStore + ?Sized,
{
    fn schedule(&self, key: &str, member: &str, ready_at_ms: i64) -> StoreResult<()> {
        (**self).schedule(key, member, ready_at_ms)
    }

    fn due(&self, key: &str, now_ms: i64, limit: usize) -> StoreResult<Vec<String>> {
        (**self).due(key, now_ms, limit)
    }

    fn claim(&self, key: &str, member: &str) -> StoreResult<bool> {
        (**self).claim(key, member)
    }

    fn scheduled_len(&self, key: &str) -> StoreResult<u64> {
        (**self).scheduled_len(key)
    }
}
