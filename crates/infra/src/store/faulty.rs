//! In-memory store with switchable failures, for error-path tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::in_memory::InMemoryStore;
use super::r#trait::{ListStore, ScheduleStore, StoreError, StoreResult};

#[derive(Debug, Default)]
pub(crate) struct FaultyStore {
    inner: InMemoryStore,
    failing_push_keys: Mutex<HashSet<String>>,
    pop_failures: AtomicUsize,
    fail_schedule: AtomicBool,
}

fn refused() -> StoreError {
    StoreError::Connection("connection refused".to_string())
}

impl FaultyStore {
    pub(crate) fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Direct access that bypasses every injected fault.
    pub(crate) fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub(crate) fn fail_pushes_to(&self, key: &str) {
        self.failing_push_keys.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn heal_pushes(&self) {
        self.failing_push_keys.lock().unwrap().clear();
    }

    /// Fail the next `n` pops, then behave normally.
    pub(crate) fn fail_next_pops(&self, n: usize) {
        self.pop_failures.store(n, Ordering::SeqCst);
    }

    pub(crate) fn fail_schedules(&self, fail: bool) {
        self.fail_schedule.store(fail, Ordering::SeqCst);
    }
}

impl ListStore for FaultyStore {
    fn push_head(&self, key: &str, value: &str) -> StoreResult<u64> {
        if self.failing_push_keys.lock().unwrap().contains(key) {
            return Err(refused());
        }
        self.inner.push_head(key, value)
    }

    fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let failing = self
            .pop_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(refused());
        }
        self.inner.pop_tail_blocking(key, timeout)
    }

    fn length(&self, key: &str) -> StoreResult<u64> {
        self.inner.length(key)
    }

    fn range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        self.inner.range(key, start, stop)
    }

    fn remove_value(&self, key: &str, count: u64, value: &str) -> StoreResult<u64> {
        self.inner.remove_value(key, count, value)
    }
}

impl ScheduleStore for FaultyStore {
    fn schedule(&self, key: &str, member: &str, ready_at_ms: i64) -> StoreResult<()> {
        if self.fail_schedule.load(Ordering::SeqCst) {
            return Err(refused());
        }
        self.inner.schedule(key, member, ready_at_ms)
    }

    fn due(&self, key: &str, now_ms: i64, limit: usize) -> StoreResult<Vec<String>> {
        self.inner.due(key, now_ms, limit)
    }

    fn claim(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.claim(key, member)
    }

    fn scheduled_len(&self, key: &str) -> StoreResult<u64> {
        self.inner.scheduled_len(key)
    }
}
