//! Redis-backed list + schedule store (optional, `redis` feature).
//!
//! - Lists: `LPUSH` / `BRPOP` / `LLEN` / `LRANGE` / `LREM`
//! - Retry schedule: a sorted set scored by ready-at millis
//!   (`ZADD` / `ZRANGEBYSCORE` / `ZREM` / `ZCARD`)
//!
//! `BRPOP` hands each element to exactly one blocked client and `ZREM`
//! reports removal to exactly one caller, which is all the queue needs for
//! delivery uniqueness across processes.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;

use super::r#trait::{ListStore, ScheduleStore, StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct RedisStore {
    client: Arc<redis::Client>,
}

impl RedisStore {
    /// Create a store for `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// No connection is made until the first command.
    pub fn new(redis_url: impl AsRef<str>) -> StoreResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
        })
    }

    fn connection(&self) -> StoreResult<redis::Connection> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }
}

fn command_error(cmd: &str, e: redis::RedisError) -> StoreError {
    if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        StoreError::Connection(format!("{cmd} failed: {e}"))
    } else {
        StoreError::Command(format!("{cmd} failed: {e}"))
    }
}

impl ListStore for RedisStore {
    #[instrument(skip(self, value), err)]
    fn push_head(&self, key: &str, value: &str) -> StoreResult<u64> {
        let mut conn = self.connection()?;
        redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query(&mut conn)
            .map_err(|e| command_error("LPUSH", e))
    }

    fn pop_tail_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;

        // Reply is nil on timeout, otherwise [key, value].
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            // BRPOP reads 0 as "block forever".
            .arg(timeout.max(Duration::from_millis(1)).as_secs_f64())
            .query(&mut conn)
            .map_err(|e| command_error("BRPOP", e))?;

        Ok(popped.map(|(_, value)| value))
    }

    fn length(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection()?;
        redis::cmd("LLEN")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("LLEN", e))
    }

    fn range(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let mut conn = self.connection()?;
        redis::cmd("LRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query(&mut conn)
            .map_err(|e| command_error("LRANGE", e))
    }

    #[instrument(skip(self, value), err)]
    fn remove_value(&self, key: &str, count: u64, value: &str) -> StoreResult<u64> {
        // LREM treats count 0 as "all"; callers always pass a positive bound.
        let mut conn = self.connection()?;
        redis::cmd("LREM")
            .arg(key)
            .arg(count.max(1))
            .arg(value)
            .query(&mut conn)
            .map_err(|e| command_error("LREM", e))
    }
}

impl ScheduleStore for RedisStore {
    #[instrument(skip(self, member), err)]
    fn schedule(&self, key: &str, member: &str, ready_at_ms: i64) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let _: u64 = redis::cmd("ZADD")
            .arg(key)
            .arg(ready_at_ms)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_error("ZADD", e))?;
        Ok(())
    }

    fn due(&self, key: &str, now_ms: i64, limit: usize) -> StoreResult<Vec<String>> {
        let mut conn = self.connection()?;
        redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(now_ms)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query(&mut conn)
            .map_err(|e| command_error("ZRANGEBYSCORE", e))
    }

    fn claim(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let removed: u64 = redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query(&mut conn)
            .map_err(|e| command_error("ZREM", e))?;
        Ok(removed == 1)
    }

    fn scheduled_len(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.connection()?;
        redis::cmd("ZCARD")
            .arg(key)
            .query(&mut conn)
            .map_err(|e| command_error("ZCARD", e))
    }
}
