//! The job record.
//!
//! A [`Job`] is only ever mutated in three places: the retry coordinator
//! (`attempt`, `last_error`), the dead-letter transition (`failed_at`) and
//! resurrection (which resets all three). Everything else is fixed at
//! creation.
//!
//! ## Wire format
//!
//! Jobs cross the queue/store boundary as flat camelCase JSON:
//!
//! ```text
//! { id, kind, channel, targetId, payload, createdAt, attempt, maxAttempts, lastError?, failedAt? }
//! ```
//!
//! Optional fields are omitted while unset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::JobId;

/// Caller data carried by a job (open key-value mapping).
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Kind tag used for notification deliveries.
pub const NOTIFICATION_KIND: &str = "notification";

/// Retry budget applied when the producer does not pick one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    /// Delivery-method tag ("email", "sms", "push", ...).
    pub channel: String,
    pub target_id: i64,
    #[serde(default)]
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    /// Failed handler invocations so far.
    #[serde(default)]
    pub attempt: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set only when the job is dead-lettered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a notification job with a generated id and the default retry budget.
    pub fn new(channel: impl Into<String>, target_id: i64, payload: Payload) -> Self {
        Self {
            id: JobId::new(),
            kind: NOTIFICATION_KIND.to_string(),
            channel: channel.into(),
            target_id,
            payload,
            created_at: Utc::now(),
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            failed_at: None,
        }
    }

    pub fn builder(channel: impl Into<String>, target_id: i64) -> JobBuilder {
        JobBuilder::new(channel, target_id)
    }

    /// Record one failed handler invocation. Returns the new attempt count.
    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        self.attempt = self.attempt.saturating_add(1);
        self.last_error = Some(error.into());
        self.attempt
    }

    /// Whether the retry budget is spent (`attempt > max_attempts`).
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }

    /// Stamp the dead-letter transition time.
    pub fn mark_dead_lettered(&mut self, at: DateTime<Utc>) {
        self.failed_at = Some(at);
    }

    /// Fresh copy for re-submission after resurrection: same identity,
    /// clean retry bookkeeping.
    pub fn resurrected(mut self) -> Self {
        self.attempt = 0;
        self.last_error = None;
        self.failed_at = None;
        self
    }

    /// Serialize to the wire format.
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the wire format.
    pub fn from_wire(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Check the creation-time invariants.
    pub fn validate(&self) -> DomainResult<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(DomainError::invalid_id("job id must not be empty"));
        }
        if self.channel.trim().is_empty() {
            return Err(DomainError::validation("channel must not be empty"));
        }
        if self.max_attempts == 0 {
            return Err(DomainError::validation("maxAttempts must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for jobs that need a caller-chosen id, kind or retry budget.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(channel: impl Into<String>, target_id: i64) -> Self {
        Self {
            job: Job::new(channel, target_id, Payload::new()),
        }
    }

    pub fn id(mut self, id: impl Into<JobId>) -> Self {
        self.job.id = id.into();
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.job.kind = kind.into();
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.job.max_attempts = max_attempts;
        self
    }

    pub fn payload(mut self, payload: Payload) -> Self {
        self.job.payload = payload;
        self
    }

    /// Insert a single payload entry.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.job.payload.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> DomainResult<Job> {
        self.job.validate()?;
        Ok(self.job)
    }
}
