use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::r#trait::{ListStore, ScheduleStore, StoreError, StoreResult};

/// In-memory list + schedule store.
///
/// Intended for tests/dev and single-process deployments. Blocking pops park
/// on a condition variable, so idle consumers do not spin.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Condvar,
    schedules: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

/// Resolve Redis-style inclusive indexes against a list of `len` elements.
fn resolve_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as i64;
    let start = if start < 0 { (start + len_i).max(0) } else { start };
    let stop = if stop < 0 { stop + len_i } else { stop.min(len_i - 1) };

    if start > stop || start >= len_i {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl ListStore for InMemoryStore {
    fn push_head(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut lists = self.lists.lock().map_err(|_| StoreError::Poisoned)?;
        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        let len = list.len() as u64;
        drop(lists);

        self.pushed.notify_all();
        Ok(len)
    }

    fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut lists = self.lists.lock().map_err(|_| StoreError::Poisoned)?;

        loop {
            if let Some(value) = lists.get_mut(key).and_then(VecDeque::pop_back) {
                return Ok(Some(value));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let (guard, _) = self
                .pushed
                .wait_timeout(lists, deadline - now)
                .map_err(|_| StoreError::Poisoned)?;
            lists = guard;
        }
    }

    fn length(&self, key: &str) -> StoreResult<u64> {
        let lists = self.lists.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(lists.get(key).map_or(0, |l| l.len() as u64))
    }

    fn range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let lists = self.lists.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(list) = lists.get(key) else {
            return Ok(vec![]);
        };

        Ok(match resolve_range(list.len(), start, stop) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => vec![],
        })
    }

    fn remove_value(&self, key: &str, count: u64, value: &str) -> StoreResult<u64> {
        let mut lists = self.lists.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(list) = lists.get_mut(key) else {
            return Ok(0);
        };

        let mut removed = 0;
        let mut idx = 0;
        while idx < list.len() && removed < count {
            if list[idx] == value {
                list.remove(idx);
                removed += 1;
            } else {
                idx += 1;
            }
        }
        Ok(removed)
    }
}

impl ScheduleStore for InMemoryStore {
    fn schedule(&self, key: &str, member: &str, ready_at_ms: i64) -> StoreResult<()> {
        let mut schedules = self.schedules.lock().map_err(|_| StoreError::Poisoned)?;
        schedules
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), ready_at_ms);
        Ok(())
    }

    fn due(&self, key: &str, now_ms: i64, limit: usize) -> StoreResult<Vec<String>> {
        let schedules = self.schedules.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(index) = schedules.get(key) else {
            return Ok(vec![]);
        };

        let mut due: Vec<(i64, &String)> = index
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .map(|(member, at)| (*at, member))
            .collect();
        due.sort();
        due.truncate(limit);

        Ok(due.into_iter().map(|(_, m)| m.clone()).collect())
    }

    fn claim(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut schedules = self.schedules.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(schedules
            .get_mut(key)
            .is_some_and(|index| index.remove(member).is_some()))
    }

    fn scheduled_len(&self, key: &str) -> StoreResult<u64> {
        let schedules = self.schedules.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(schedules.get(key).map_or(0, |i| i.len() as u64))
    }
}
