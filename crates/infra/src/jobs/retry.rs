//! Retry coordinator: failure accounting and the retry-vs-dead-letter decision.
//!
//! ```text
//! Queued → Processing → Delivered
//!                     → RetryScheduled → Queued
//!                     → DeadLettered
//! ```
//!
//! Success needs no coordinator action. On failure the coordinator bumps
//! `attempt`, records the error, and either persists the job in the retry
//! schedule or hands it to the dead-letter store once `attempt > max_attempts`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use herald_core::{Job, JobId};

use super::backoff::BackoffSchedule;
use super::dead_letter::DeadLetterStore;
use super::queue::QueueError;
use super::schedule::RetrySchedule;
use crate::store::{ListStore, ScheduleStore};

/// What the coordinator did with a failed job.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDecision {
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        ready_at: DateTime<Utc>,
    },
    DeadLettered { attempt: u32 },
}

/// Failures that leave a job in no list at all.
///
/// Both variants mean the job has already left the main queue and was not
/// recorded anywhere else. They are distinct from handler failures and must
/// be reported loudly.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("failed to dead-letter job {job_id}: {source}")]
    DeadLetterAppend {
        job_id: JobId,
        #[source]
        source: QueueError,
    },

    #[error("failed to schedule retry of job {job_id}: {source}")]
    ScheduleRetry {
        job_id: JobId,
        #[source]
        source: QueueError,
    },
}

impl RetryError {
    pub fn job_id(&self) -> &JobId {
        match self {
            RetryError::DeadLetterAppend { job_id, .. } | RetryError::ScheduleRetry { job_id, .. } => {
                job_id
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator<S> {
    backoff: BackoffSchedule,
    schedule: RetrySchedule<S>,
    dead_letters: DeadLetterStore<S>,
}

impl<S> RetryCoordinator<S>
where
    S: ListStore + ScheduleStore + Clone,
{
    pub fn new(
        backoff: BackoffSchedule,
        schedule: RetrySchedule<S>,
        dead_letters: DeadLetterStore<S>,
    ) -> Self {
        Self {
            backoff,
            schedule,
            dead_letters,
        }
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    pub fn schedule(&self) -> &RetrySchedule<S> {
        &self.schedule
    }

    pub fn dead_letters(&self) -> &DeadLetterStore<S> {
        &self.dead_letters
    }

    /// Account for one failed handler invocation and route the job.
    pub fn on_failure(
        &self,
        job: &mut Job,
        error: impl Into<String>,
    ) -> Result<FailureDecision, RetryError> {
        self.on_failure_at(job, error, Utc::now())
    }

    /// As [`on_failure`](Self::on_failure) with an explicit clock.
    pub fn on_failure_at(
        &self,
        job: &mut Job,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<FailureDecision, RetryError> {
        let attempt = job.record_failure(error);

        if job.is_exhausted() {
            self.dead_letters
                .move_job(job)
                .map_err(|source| RetryError::DeadLetterAppend {
                    job_id: job.id.clone(),
                    source,
                })?;
            return Ok(FailureDecision::DeadLettered { attempt });
        }

        let delay = self.backoff.delay_for_attempt(attempt);
        let ready_at = now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        self.schedule
            .schedule(job, ready_at)
            .map_err(|source| RetryError::ScheduleRetry {
                job_id: job.id.clone(),
                source,
            })?;

        warn!(
            job_id = %job.id,
            channel = %job.channel,
            attempt,
            max_attempts = job.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = job.last_error.as_deref().unwrap_or_default(),
            "job retry scheduled"
        );

        Ok(FailureDecision::RetryScheduled {
            attempt,
            delay,
            ready_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::queue::JobQueue;
    use crate::store::InMemoryStore;
    use crate::store::faulty::FaultyStore;
    use std::sync::Arc;

    fn coordinator(store: Arc<InMemoryStore>) -> RetryCoordinator<Arc<InMemoryStore>> {
        let queue = JobQueue::new(store.clone(), "q");
        RetryCoordinator::new(
            BackoffSchedule::default(),
            RetrySchedule::new(store, queue.retry_key()),
            DeadLetterStore::new(queue),
        )
    }

    #[test]
    fn failure_within_budget_schedules_retry_with_backoff() {
        let store = InMemoryStore::arc();
        let coord = coordinator(store.clone());
        let mut job = Job::builder("email", 1).id("j").max_attempts(3).build().unwrap();
        let now = Utc::now();

        let decision = coord.on_failure_at(&mut job, "smtp down", now).unwrap();

        let (attempt, delay, ready_at) = match decision {
            FailureDecision::RetryScheduled { attempt, delay, ready_at } => (attempt, delay, ready_at),
            other => panic!("expected retry, got {other:?}"),
        };
        assert_eq!(attempt, 1);
        assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
        assert!(ready_at > now);
        assert_eq!(job.last_error.as_deref(), Some("smtp down"));
        assert!(job.failed_at.is_none());
        assert_eq!(coord.schedule().len().unwrap(), 1);
        assert_eq!(coord.dead_letters().count().unwrap(), 0);
    }

    #[test]
    fn retry_is_not_ready_before_its_delay() {
        let store = InMemoryStore::arc();
        let coord = coordinator(store);
        let mut job = Job::builder("sms", 1).build().unwrap();
        let now = Utc::now();

        coord.on_failure_at(&mut job, "e", now).unwrap();

        assert!(coord.schedule().due(now, 10).unwrap().is_empty());
        let later = now + chrono::Duration::seconds(13);
        assert_eq!(coord.schedule().due(later, 10).unwrap().len(), 1);
    }

    #[test]
    fn exceeding_budget_dead_letters() {
        let store = InMemoryStore::arc();
        let coord = coordinator(store);
        let mut job = Job::builder("push", 1).max_attempts(1).build().unwrap();

        coord.on_failure(&mut job, "e1").unwrap();
        let decision = coord.on_failure(&mut job, "e2").unwrap();

        assert_eq!(decision, FailureDecision::DeadLettered { attempt: 2 });
        assert!(job.failed_at.is_some());
        assert_eq!(coord.dead_letters().count().unwrap(), 1);
        // The first retry is still parked in the schedule; the worker would
        // have promoted it before the second failure in real operation.
        assert_eq!(coord.schedule().len().unwrap(), 1);
    }

    #[test]
    fn dead_letter_append_failure_is_distinct() {
        let store = FaultyStore::arc();
        store.fail_pushes_to("q:dlq");
        let queue = JobQueue::new(store.clone(), "q");
        let coord = RetryCoordinator::new(
            BackoffSchedule::default(),
            RetrySchedule::new(store, queue.retry_key()),
            DeadLetterStore::new(queue),
        );
        let mut job = Job::builder("email", 1).id("lost").max_attempts(1).build().unwrap();
        job.record_failure("e1");

        let err = coord.on_failure(&mut job, "e2").unwrap_err();
        assert!(matches!(err, RetryError::DeadLetterAppend { .. }));
        assert_eq!(err.job_id(), &JobId::from("lost"));
        assert!(job.failed_at.is_none());
    }

    #[test]
    fn schedule_failure_is_reported() {
        let store = FaultyStore::arc();
        store.fail_schedules(true);
        let queue = JobQueue::new(store.clone(), "q");
        let coord = RetryCoordinator::new(
            BackoffSchedule::default(),
            RetrySchedule::new(store, queue.retry_key()),
            DeadLetterStore::new(queue),
        );
        let mut job = Job::builder("sms", 1).id("parked").build().unwrap();

        let err = coord.on_failure(&mut job, "e1").unwrap_err();
        assert!(matches!(err, RetryError::ScheduleRetry { .. }));
        assert_eq!(job.attempt, 1);
    }
}
