//! Queue facade: job (de)serialization over a [`ListStore`] list.

use std::time::Duration;

use tracing::debug;

use herald_core::{DomainError, Job, JobId};

use crate::store::{ListStore, StoreError};

/// Suffix of the dead-letter list key.
pub const DEAD_LETTER_SUFFIX: &str = ":dlq";

/// Suffix of the retry schedule key.
pub const RETRY_SUFFIX: &str = ":retry";

/// Queue facade / dead-letter / schedule error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode job {job_id}: {source}")]
    Encode {
        job_id: JobId,
        #[source]
        source: serde_json::Error,
    },

    /// An entry in `key` is not a valid job. The raw text is kept so it can
    /// be logged; the entry has already left the list when this comes from a
    /// dequeue.
    #[error("undecodable entry in {key}: {source}")]
    Decode {
        key: String,
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Invalid(#[from] DomainError),
}

impl QueueError {
    /// Whether the error came from the store itself (as opposed to bad data).
    pub fn is_store_failure(&self) -> bool {
        matches!(self, QueueError::Store(_))
    }
}

pub(crate) fn encode(job: &Job) -> Result<String, QueueError> {
    job.to_wire().map_err(|source| QueueError::Encode {
        job_id: job.id.clone(),
        source,
    })
}

pub(crate) fn decode(key: &str, raw: String) -> Result<Job, QueueError> {
    match Job::from_wire(&raw) {
        Ok(job) => Ok(job),
        Err(source) => Err(QueueError::Decode {
            key: key.to_string(),
            raw,
            source,
        }),
    }
}

/// FIFO job queue over one list key.
///
/// Jobs are pushed at the head and consumed from the tail. With a single
/// consumer, delivery order equals enqueue order; with several, each job still
/// goes to exactly one of them.
#[derive(Debug, Clone)]
pub struct JobQueue<S> {
    store: S,
    key: String,
}

impl<S: ListStore> JobQueue<S> {
    pub fn new(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn dead_letter_key(&self) -> String {
        format!("{}{DEAD_LETTER_SUFFIX}", self.key)
    }

    pub fn retry_key(&self) -> String {
        format!("{}{RETRY_SUFFIX}", self.key)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Serialize `job` and append it at the fresh end of the queue.
    pub fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        job.validate()?;
        let raw = encode(job)?;
        self.push_raw(&raw)?;
        debug!(queue = %self.key, job_id = %job.id, channel = %job.channel, attempt = job.attempt, "job enqueued");
        Ok(())
    }

    /// Push an already-serialized job (retry promotion, DLQ rollback).
    pub(crate) fn push_raw(&self, raw: &str) -> Result<u64, QueueError> {
        Ok(self.store.push_head(&self.key, raw)?)
    }

    /// Wait up to `timeout` for the oldest job.
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Timeouts under one
    /// millisecond are rejected: Redis truncates them to 0, which blocks
    /// forever.
    pub fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        if timeout.as_millis() == 0 {
            return Err(DomainError::validation("dequeue timeout must be at least 1ms").into());
        }

        match self.store.pop_tail_blocking(&self.key, timeout)? {
            Some(raw) => decode(&self.key, raw).map(Some),
            None => Ok(None),
        }
    }

    /// Current queue length. Stale as soon as it returns; observability only.
    pub fn size(&self) -> Result<u64, QueueError> {
        Ok(self.store.length(&self.key)?)
    }

    /// The `n` most recently enqueued jobs, newest first. Does not remove
    /// anything; never use it to consume.
    pub fn peek(&self, n: usize) -> Result<Vec<Job>, QueueError> {
        if n == 0 {
            return Ok(vec![]);
        }
        let stop = i64::try_from(n).unwrap_or(i64::MAX) - 1;

        self.store
            .range(&self.key, 0, stop)?
            .into_iter()
            .map(|raw| decode(&self.key, raw))
            .collect()
    }
}
