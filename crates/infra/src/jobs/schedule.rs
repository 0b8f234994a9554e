//! Persisted retry schedule.
//!
//! A failed job waiting for its backoff to elapse is stored in a
//! ready-time-ordered index instead of a process-local timer, so a restart
//! during the wait does not lose it. Any worker process may promote due
//! entries; the store's atomic claim makes sure each entry is promoted once.
//!
//! There is still a narrow window between claiming an entry and pushing it
//! onto the queue. If the push fails the entry is put back in the schedule;
//! a crash exactly inside that window loses the retry.

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use herald_core::Job;

use super::queue::{JobQueue, QueueError, encode};
use crate::store::{ListStore, ScheduleStore};

#[derive(Debug, Clone)]
pub struct RetrySchedule<S> {
    store: S,
    key: String,
}

impl<S> RetrySchedule<S>
where
    S: ListStore + ScheduleStore,
{
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Persist `job` to be re-queued at `ready_at`.
    pub fn schedule(&self, job: &Job, ready_at: DateTime<Utc>) -> Result<(), QueueError> {
        let raw = encode(job)?;
        self.store
            .schedule(&self.key, &raw, ready_at.timestamp_millis())?;
        Ok(())
    }

    /// Number of retries waiting for their ready time.
    pub fn len(&self) -> Result<u64, QueueError> {
        Ok(self.store.scheduled_len(&self.key)?)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Jobs whose ready time is at or before `now`, earliest first.
    /// Non-destructive.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, QueueError> {
        let raws = self.store.due(&self.key, now.timestamp_millis(), limit)?;
        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws {
            match Job::from_wire(&raw) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(key = %self.key, error = %e, "skipping undecodable scheduled retry"),
            }
        }
        Ok(jobs)
    }

    /// Move up to `limit` due retries onto `queue`. Returns how many this
    /// caller promoted; entries claimed by a concurrent promoter are skipped.
    pub fn promote_due(
        &self,
        queue: &JobQueue<S>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<usize, QueueError> {
        let now_ms = now.timestamp_millis();
        let mut promoted = 0;

        for raw in self.store.due(&self.key, now_ms, limit)? {
            if !self.store.claim(&self.key, &raw)? {
                continue;
            }

            if let Err(err) = queue.push_raw(&raw) {
                // Put it back so the next pass can try again.
                if let Err(rollback) = self.store.schedule(&self.key, &raw, now_ms) {
                    error!(
                        key = %self.key,
                        error = %rollback,
                        job = %raw,
                        "failed to restore claimed retry; job dropped"
                    );
                }
                return Err(err);
            }
            promoted += 1;
        }

        if promoted > 0 {
            debug!(key = %self.key, queue = %queue.key(), promoted, "promoted due retries");
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::store::faulty::FaultyStore;
    use chrono::Duration as ChronoDuration;
    use std::sync::Arc;
    use std::time::Duration;

    fn setup() -> (JobQueue<Arc<InMemoryStore>>, RetrySchedule<Arc<InMemoryStore>>) {
        let store = InMemoryStore::arc();
        let queue = JobQueue::new(store.clone(), "q");
        let schedule = RetrySchedule::new(store, queue.retry_key());
        (queue, schedule)
    }

    #[test]
    fn only_due_entries_are_promoted() {
        let (queue, schedule) = setup();
        let now = Utc::now();

        let soon = Job::builder("sms", 1).id("soon").build().unwrap();
        let later = Job::builder("sms", 2).id("later").build().unwrap();
        schedule.schedule(&soon, now - ChronoDuration::seconds(1)).unwrap();
        schedule.schedule(&later, now + ChronoDuration::minutes(5)).unwrap();

        assert_eq!(schedule.promote_due(&queue, now, 100).unwrap(), 1);
        assert_eq!(schedule.len().unwrap(), 1);

        let job = queue.dequeue(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(job.id, "soon");
    }

    #[test]
    fn promotion_preserves_retry_bookkeeping() {
        let (queue, schedule) = setup();
        let mut job = Job::builder("push", 9).id("j").build().unwrap();
        job.record_failure("gateway 503");

        let now = Utc::now();
        schedule.schedule(&job, now).unwrap();
        schedule.promote_due(&queue, now, 10).unwrap();

        let back = queue.dequeue(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(back.attempt, 1);
        assert_eq!(back.last_error.as_deref(), Some("gateway 503"));
    }

    #[test]
    fn survives_a_new_schedule_handle() {
        // Simulates a restart: the schedule lives in the store, not the handle.
        let store = InMemoryStore::arc();
        let job = Job::builder("email", 3).id("persisted").build().unwrap();
        let now = Utc::now();

        RetrySchedule::new(store.clone(), "q:retry")
            .schedule(&job, now)
            .unwrap();

        let queue = JobQueue::new(store.clone(), "q");
        let fresh = RetrySchedule::new(store, "q:retry");
        assert_eq!(fresh.due(now, 10).unwrap()[0].id, "persisted");
        assert_eq!(fresh.promote_due(&queue, now, 10).unwrap(), 1);
        assert_eq!(queue.size().unwrap(), 1);
        assert!(fresh.is_empty().unwrap());
    }

    #[test]
    fn failed_push_returns_entry_to_schedule() {
        let store = FaultyStore::arc();
        let queue = JobQueue::new(store.clone(), "q");
        let schedule = RetrySchedule::new(store.clone(), queue.retry_key());
        let job = Job::builder("email", 4).id("bounced").build().unwrap();
        let now = Utc::now();
        schedule.schedule(&job, now).unwrap();

        store.fail_pushes_to("q");
        let err = schedule.promote_due(&queue, now, 10).unwrap_err();
        assert!(err.is_store_failure());
        assert_eq!(schedule.len().unwrap(), 1);
        assert_eq!(queue.size().unwrap(), 0);

        store.heal_pushes();
        assert_eq!(schedule.promote_due(&queue, now, 10).unwrap(), 1);
        assert_eq!(queue.dequeue(Duration::from_millis(10)).unwrap().unwrap().id, "bounced");
    }
}
