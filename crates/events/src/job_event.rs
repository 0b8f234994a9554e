//! Outcome events published by the worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use herald_core::{Job, JobId};

/// Discriminant of a [`JobEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Delivered,
    RetryScheduled,
    DeadLettered,
    Resurrected,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::Delivered,
        EventKind::RetryScheduled,
        EventKind::DeadLettered,
        EventKind::Resurrected,
    ];
}

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// Handler succeeded; the job is gone from every list.
    Delivered {
        job_id: JobId,
        channel: String,
        target_id: i64,
        at: DateTime<Utc>,
    },
    /// Handler failed and the job will be re-queued at `ready_at`.
    RetryScheduled {
        job_id: JobId,
        attempt: u32,
        error: String,
        ready_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the job is in the dead-letter store.
    DeadLettered {
        job_id: JobId,
        attempt: u32,
        error: String,
        at: DateTime<Utc>,
    },
    /// An operator moved the job out of the dead-letter store.
    Resurrected { job_id: JobId, at: DateTime<Utc> },
}

impl JobEvent {
    pub fn delivered(job: &Job) -> Self {
        Self::Delivered {
            job_id: job.id.clone(),
            channel: job.channel.clone(),
            target_id: job.target_id,
            at: Utc::now(),
        }
    }

    pub fn retry_scheduled(job: &Job, ready_at: DateTime<Utc>) -> Self {
        Self::RetryScheduled {
            job_id: job.id.clone(),
            attempt: job.attempt,
            error: job.last_error.clone().unwrap_or_default(),
            ready_at,
        }
    }

    pub fn dead_lettered(job: &Job) -> Self {
        Self::DeadLettered {
            job_id: job.id.clone(),
            attempt: job.attempt,
            error: job.last_error.clone().unwrap_or_default(),
            at: job.failed_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn resurrected(job_id: JobId) -> Self {
        Self::Resurrected {
            job_id,
            at: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Delivered { job_id, .. }
            | JobEvent::RetryScheduled { job_id, .. }
            | JobEvent::DeadLettered { job_id, .. }
            | JobEvent::Resurrected { job_id, .. } => job_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::Delivered { .. } => EventKind::Delivered,
            JobEvent::RetryScheduled { .. } => EventKind::RetryScheduled,
            JobEvent::DeadLettered { .. } => EventKind::DeadLettered,
            JobEvent::Resurrected { .. } => EventKind::Resurrected,
        }
    }
}
