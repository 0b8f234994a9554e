//! Job queue with retry, backoff, and dead-letter handling.
//!
//! ## Design
//!
//! - Jobs cross the store boundary only in serialized form
//! - FIFO per queue; each job is handed to exactly one consumer
//! - Retry with table-driven backoff and ±jitter
//! - Pending retries are persisted, not held in process timers
//! - Dead-letter list for jobs past their retry budget, with resurrection
//!
//! ## Components
//!
//! - `JobQueue`: enqueue / dequeue / size / peek over a list key
//! - `RetryCoordinator`: failure accounting and the retry-vs-dead-letter decision
//! - `RetrySchedule`: ready-time-ordered index of pending retries
//! - `DeadLetterStore`: failed jobs for inspection and resurrection
//! - `Worker`: consumer loop driving handlers and the coordinator

pub mod backoff;
pub mod dead_letter;
pub mod queue;
pub mod retry;
pub mod schedule;
pub mod sink;
pub mod worker;

pub use backoff::BackoffSchedule;
pub use dead_letter::DeadLetterStore;
pub use queue::{JobQueue, QueueError};
pub use retry::{FailureDecision, RetryCoordinator, RetryError};
pub use schedule::RetrySchedule;
pub use sink::OutcomeSink;
pub use worker::{
    JobHandler, JobOutcome, ProcessReport, Processed, Worker, WorkerConfig, WorkerHandle,
    WorkerStats,
};

use crate::store::{ListStore, ScheduleStore};

/// Point-in-time sizes of the three lists behind one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub queued: u64,
    pub scheduled: u64,
    pub dead_lettered: u64,
}

/// All components for one queue name, wired to one store.
#[derive(Debug, Clone)]
pub struct JobSystem<S> {
    queue: JobQueue<S>,
    schedule: RetrySchedule<S>,
    dead_letters: DeadLetterStore<S>,
    backoff: BackoffSchedule,
    sink: Option<OutcomeSink>,
}

impl<S> JobSystem<S>
where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    pub fn new(store: S, queue_key: impl Into<String>, backoff: BackoffSchedule) -> Self {
        let queue = JobQueue::new(store.clone(), queue_key);
        let schedule = RetrySchedule::new(store, queue.retry_key());
        let dead_letters = DeadLetterStore::new(queue.clone());
        Self {
            queue,
            schedule,
            dead_letters,
            backoff,
            sink: None,
        }
    }

    /// Publish job outcomes (including resurrections) to `sink`.
    pub fn with_sink(mut self, sink: OutcomeSink) -> Self {
        self.dead_letters = self.dead_letters.with_sink(sink.clone());
        self.sink = Some(sink);
        self
    }

    pub fn queue(&self) -> &JobQueue<S> {
        &self.queue
    }

    pub fn schedule(&self) -> &RetrySchedule<S> {
        &self.schedule
    }

    pub fn dead_letters(&self) -> &DeadLetterStore<S> {
        &self.dead_letters
    }

    pub fn coordinator(&self) -> RetryCoordinator<S> {
        RetryCoordinator::new(
            self.backoff.clone(),
            self.schedule.clone(),
            self.dead_letters.clone(),
        )
    }

    /// A worker with no handlers registered yet.
    pub fn worker(&self) -> Worker<S> {
        let worker = Worker::new(self.queue.clone(), self.coordinator());
        match &self.sink {
            Some(sink) => worker.with_sink(sink.clone()),
            None => worker,
        }
    }

    pub fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(QueueStats {
            queued: self.queue.size()?,
            scheduled: self.schedule.len()?,
            dead_lettered: self.dead_letters.count()?,
        })
    }
}
