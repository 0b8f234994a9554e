//! Dead-letter store.
//!
//! A second list (`<queue>:dlq`) holding jobs whose retry budget is spent.
//! Workers never pop it; entries leave only through resurrection, which
//! removes exactly one serialized copy and re-enqueues a clean job with the
//! same id.

use chrono::Utc;
use tracing::{error, info, warn};

use herald_core::Job;
use herald_events::JobEvent;

use super::queue::{JobQueue, QueueError, decode, encode};
use super::sink::{OutcomeSink, emit};
use crate::store::ListStore;

#[derive(Debug, Clone)]
pub struct DeadLetterStore<S> {
    queue: JobQueue<S>,
    key: String,
    sink: Option<OutcomeSink>,
}

impl<S> DeadLetterStore<S>
where
    S: ListStore + Clone,
{
    /// Dead-letter store paired with `queue`; resurrected jobs go back there.
    pub fn new(queue: JobQueue<S>) -> Self {
        let key = queue.dead_letter_key();
        Self {
            queue,
            key,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: OutcomeSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn store(&self) -> &S {
        self.queue.store()
    }

    /// Stamp `failed_at` and append the job to the dead-letter list.
    ///
    /// An error here means the job is in neither list; callers must treat it
    /// as fatal for this job and surface it loudly.
    /// `failed_at` is only set on `job` once the append has succeeded.
    pub fn move_job(&self, job: &mut Job) -> Result<(), QueueError> {
        let mut dead = job.clone();
        dead.mark_dead_lettered(Utc::now());
        let raw = encode(&dead)?;
        self.store().push_head(&self.key, &raw)?;
        job.failed_at = dead.failed_at;

        warn!(
            dlq = %self.key,
            job_id = %job.id,
            channel = %job.channel,
            attempt = job.attempt,
            error = job.last_error.as_deref().unwrap_or_default(),
            "job dead-lettered"
        );
        Ok(())
    }

    /// Every dead-lettered job, most recently dead-lettered first.
    ///
    /// Undecodable entries are logged and left out.
    pub fn list(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self
            .snapshot()?
            .into_iter()
            .map(|(_, job)| job)
            .collect())
    }

    pub fn count(&self) -> Result<u64, QueueError> {
        Ok(self.store().length(&self.key)?)
    }

    /// Resurrect the first dead-lettered job with `id`.
    ///
    /// Returns `Ok(false)` (and changes nothing) when no such job is in the
    /// store. If the re-enqueue fails the entry is pushed back to the
    /// dead-letter list before the error is returned.
    pub fn resurrect_one(&self, id: &str) -> Result<bool, QueueError> {
        for (raw, job) in self.snapshot()? {
            if job.id != id {
                continue;
            }
            // Another resurrector may have taken it between the read and here.
            if self.resurrect_entry(&raw, job)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Resurrect every job present when the call starts.
    ///
    /// Works from a point-in-time read of the list: jobs dead-lettered while
    /// the pass runs stay where they are until the next call. Returns the
    /// number of jobs re-enqueued by this call.
    ///
    /// An entry that cannot be re-enqueued (e.g. it fails validation) is
    /// restored, logged and skipped. A store failure ends the pass.
    pub fn resurrect_all(&self) -> Result<usize, QueueError> {
        let mut resurrected = 0;
        for (raw, job) in self.snapshot()? {
            let job_id = job.id.clone();
            match self.resurrect_entry(&raw, job) {
                Ok(true) => resurrected += 1,
                Ok(false) => {}
                Err(err) if err.is_store_failure() => return Err(err),
                Err(err) => {
                    warn!(dlq = %self.key, job_id = %job_id, error = %err, "skipping dead letter that cannot be resurrected");
                }
            }
        }

        info!(dlq = %self.key, resurrected, "dead-letter store drained");
        Ok(resurrected)
    }

    /// Claim one serialized copy of `raw` and re-enqueue it as a clean job.
    fn resurrect_entry(&self, raw: &str, job: Job) -> Result<bool, QueueError> {
        if self.store().remove_value(&self.key, 1, raw)? == 0 {
            return Ok(false);
        }

        let fresh = job.resurrected();
        if let Err(err) = self.queue.enqueue(&fresh) {
            if let Err(restore) = self.store().push_head(&self.key, raw) {
                error!(
                    dlq = %self.key,
                    job_id = %fresh.id,
                    error = %restore,
                    job = %raw,
                    "failed to restore dead letter after aborted resurrection"
                );
            }
            return Err(err);
        }

        info!(dlq = %self.key, job_id = %fresh.id, queue = %self.queue.key(), "job resurrected");
        emit(self.sink.as_ref(), JobEvent::resurrected(fresh.id));
        Ok(true)
    }

    /// Raw entries paired with their decoded job, in list order.
    fn snapshot(&self) -> Result<Vec<(String, Job)>, QueueError> {
        let mut entries = Vec::new();
        for raw in self.store().range(&self.key, 0, -1)? {
            match decode(&self.key, raw.clone()) {
                Ok(job) => entries.push((raw, job)),
                Err(e) => warn!(dlq = %self.key, error = %e, "skipping undecodable dead letter"),
            }
        }
        Ok(entries)
    }
}
