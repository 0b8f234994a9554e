//! Worker loop: dequeue, run the channel handler, feed the outcome back.
//!
//! Handler failures (including panics) never escape the loop; they are
//! always turned into a retry or dead-letter decision. Store failures are
//! logged, counted, and followed by a short idle backoff before the next
//! dequeue.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use herald_core::{Job, JobId};
use herald_events::JobEvent;

use super::queue::{JobQueue, QueueError};
use super::retry::{FailureDecision, RetryCoordinator};
use super::sink::{OutcomeSink, emit};
use crate::store::{ListStore, ScheduleStore};

/// Result a handler reports for one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Delivered,
    /// Human-readable reason; this is all the coordinator keeps.
    Failed(String),
}

impl JobOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

impl<E: core::fmt::Display> From<Result<(), E>> for JobOutcome {
    fn from(value: Result<(), E>) -> Self {
        match value {
            Ok(()) => Self::Delivered,
            Err(e) => Self::Failed(e.to_string()),
        }
    }
}

/// Job handler function type.
pub type JobHandler = Box<dyn Fn(&Job) -> JobOutcome + Send + Sync>;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name prefix / log field
    pub name: String,
    /// Number of consuming loops
    pub concurrency: usize,
    /// Upper bound on each blocking dequeue (also bounds shutdown latency)
    pub dequeue_timeout: Duration,
    /// Pause after a store failure before trying again
    pub idle_backoff: Duration,
    /// How often due retries are moved back onto the queue
    pub promote_interval: Duration,
    /// Max retries promoted per pass
    pub promote_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "herald-worker".to_string(),
            concurrency: 4,
            dequeue_timeout: Duration::from_secs(1),
            idle_backoff: Duration::from_secs(1),
            promote_interval: Duration::from_secs(1),
            promote_batch: 100,
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }
}

/// Runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub jobs_processed: u64,
    pub jobs_delivered: u64,
    pub jobs_retried: u64,
    pub jobs_dead_lettered: u64,
    /// Jobs that could be neither retried nor dead-lettered.
    pub jobs_stranded: u64,
    pub undecodable_entries: u64,
    pub store_errors: u64,
    pub retries_promoted: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// What happened to one dequeued job.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    Delivered,
    Retried { attempt: u32, delay: Duration },
    DeadLettered { attempt: u32 },
    /// Retry scheduling or dead-letter append failed; the job is in no list.
    Stranded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessReport {
    pub job_id: JobId,
    pub outcome: Processed,
}

/// Handle to control running worker threads.
#[derive(Debug)]
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<WorkerStats>>,
    started: Instant,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for every thread.
    ///
    /// In-flight handlers run to completion; idle loops notice within one
    /// dequeue timeout.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for j in self.joins.drain(..) {
            let _ = j.join();
        }
    }

    /// Get current worker statistics.
    pub fn stats(&self) -> WorkerStats {
        let mut stats = lock_stats(&self.stats).clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }
}

fn lock_stats(stats: &Mutex<WorkerStats>) -> std::sync::MutexGuard<'_, WorkerStats> {
    // Stats are plain counters; a poisoned lock still holds usable data.
    stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queue consumer with per-channel handlers.
pub struct Worker<S> {
    queue: JobQueue<S>,
    coordinator: RetryCoordinator<S>,
    handlers: HashMap<String, JobHandler>,
    sink: Option<OutcomeSink>,
}

impl<S> Worker<S>
where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    pub fn new(queue: JobQueue<S>, coordinator: RetryCoordinator<S>) -> Self {
        Self {
            queue,
            coordinator,
            handlers: HashMap::new(),
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: OutcomeSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn queue(&self) -> &JobQueue<S> {
        &self.queue
    }

    pub fn coordinator(&self) -> &RetryCoordinator<S> {
        &self.coordinator
    }

    /// Register a handler for a channel.
    ///
    /// Patterns: exact channel (`"email"`), category (`"push.*"` matches
    /// `"push.apns"`), or `"*"` for anything else.
    pub fn register_handler<F>(&mut self, channel_pattern: impl Into<String>, handler: F)
    where
        F: Fn(&Job) -> JobOutcome + Send + Sync + 'static,
    {
        self.handlers.insert(channel_pattern.into(), Box::new(handler));
    }

    fn handler_for(&self, channel: &str) -> Option<&JobHandler> {
        if let Some(h) = self.handlers.get(channel) {
            return Some(h);
        }

        // Longest category prefix wins; the prefix keeps its dot so
        // "push.*" matches "push.apns" but not "pushover".
        let category = self
            .handlers
            .iter()
            .filter_map(|(pattern, handler)| {
                let prefix = pattern.strip_suffix('*')?;
                (prefix.ends_with('.') && channel.starts_with(prefix)).then_some((prefix.len(), handler))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, handler)| handler);

        category.or_else(|| self.handlers.get("*"))
    }

    /// Run the handler, converting "no handler" and panics into failures.
    fn execute(&self, job: &Job) -> JobOutcome {
        let Some(handler) = self.handler_for(&job.channel) else {
            warn!(job_id = %job.id, channel = %job.channel, "no handler for channel");
            return JobOutcome::failed(format!("no handler for channel: {}", job.channel));
        };

        match catch_unwind(AssertUnwindSafe(|| handler(job))) {
            Ok(outcome) => outcome,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                JobOutcome::failed(format!("handler panicked: {msg}"))
            }
        }
    }

    /// Dequeue at most one job and process it (synchronous use / tests).
    ///
    /// `Ok(None)` means the timeout elapsed with an empty queue.
    pub fn process_one(&self, timeout: Duration) -> Result<Option<ProcessReport>, QueueError> {
        Ok(self.queue.dequeue(timeout)?.map(|job| self.handle(job)))
    }

    /// Process a job that has already left the queue.
    pub fn handle(&self, mut job: Job) -> ProcessReport {
        debug!(job_id = %job.id, channel = %job.channel, attempt = job.attempt, "processing job");

        let outcome = match self.execute(&job) {
            JobOutcome::Delivered => {
                debug!(job_id = %job.id, channel = %job.channel, "job delivered");
                emit(self.sink.as_ref(), JobEvent::delivered(&job));
                Processed::Delivered
            }
            JobOutcome::Failed(reason) => match self.coordinator.on_failure(&mut job, reason) {
                Ok(FailureDecision::RetryScheduled {
                    attempt,
                    delay,
                    ready_at,
                }) => {
                    emit(self.sink.as_ref(), JobEvent::retry_scheduled(&job, ready_at));
                    Processed::Retried { attempt, delay }
                }
                Ok(FailureDecision::DeadLettered { attempt }) => {
                    emit(self.sink.as_ref(), JobEvent::dead_lettered(&job));
                    Processed::DeadLettered { attempt }
                }
                Err(err) => {
                    error!(
                        job_id = %job.id,
                        error = %err,
                        job = %job.to_wire().unwrap_or_default(),
                        "job lost: could not record failure outcome"
                    );
                    Processed::Stranded
                }
            },
        };

        ProcessReport {
            job_id: job.id,
            outcome,
        }
    }

    /// Move due retries back onto the queue.
    pub fn promote_due(&self, limit: usize) -> Result<usize, QueueError> {
        self.coordinator
            .schedule()
            .promote_due(&self.queue, Utc::now(), limit)
    }

    /// Spawn `config.concurrency` consuming threads plus one retry promoter.
    pub fn spawn(self, config: WorkerConfig) -> WorkerHandle
    where
        S: Send + Sync,
    {
        let worker = Arc::new(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let config = WorkerConfig {
            concurrency: config.concurrency.max(1),
            ..config
        };

        let mut joins = Vec::with_capacity(config.concurrency + 1);
        for idx in 0..config.concurrency {
            let (worker, stop, stats, config) = (worker.clone(), stop.clone(), stats.clone(), config.clone());
            let join = thread::Builder::new()
                .name(format!("{}-{idx}", config.name))
                .spawn(move || worker_loop(&worker, &config, &stop, &stats))
                .expect("failed to spawn worker thread");
            joins.push(join);
        }

        let promoter = {
            let (worker, stop, stats, config) = (worker.clone(), stop.clone(), stats.clone(), config.clone());
            thread::Builder::new()
                .name(format!("{}-promoter", config.name))
                .spawn(move || promoter_loop(&worker, &config, &stop, &stats))
                .expect("failed to spawn retry promoter thread")
        };
        joins.push(promoter);

        info!(
            worker = %config.name,
            queue = %worker.queue.key(),
            concurrency = config.concurrency,
            "worker started"
        );

        WorkerHandle {
            stop,
            joins,
            stats,
            started: Instant::now(),
        }
    }
}

fn record(stats: &Mutex<WorkerStats>, report: &ProcessReport) {
    let mut s = lock_stats(stats);
    s.jobs_processed += 1;
    match report.outcome {
        Processed::Delivered => s.jobs_delivered += 1,
        Processed::Retried { .. } => s.jobs_retried += 1,
        Processed::DeadLettered { .. } => s.jobs_dead_lettered += 1,
        Processed::Stranded => s.jobs_stranded += 1,
    }
}

fn worker_loop<S>(
    worker: &Worker<S>,
    config: &WorkerConfig,
    stop: &AtomicBool,
    stats: &Mutex<WorkerStats>,
) where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    debug!(worker = %config.name, "worker loop started");

    while !stop.load(Ordering::SeqCst) {
        let job = match worker.queue.dequeue(config.dequeue_timeout) {
            Ok(Some(job)) => job,
            Ok(None) => continue,
            Err(QueueError::Decode { key, raw, source }) => {
                error!(worker = %config.name, queue = %key, error = %source, raw = %raw, "discarding undecodable job");
                lock_stats(stats).undecodable_entries += 1;
                continue;
            }
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to dequeue job");
                lock_stats(stats).store_errors += 1;
                sleep_unless_stopped(config.idle_backoff, stop);
                continue;
            }
        };

        lock_stats(stats).current_running += 1;
        let report = worker.handle(job);
        {
            let mut s = lock_stats(stats);
            s.current_running = s.current_running.saturating_sub(1);
        }
        record(stats, &report);
    }

    debug!(worker = %config.name, "worker loop stopped");
}

fn promoter_loop<S>(
    worker: &Worker<S>,
    config: &WorkerConfig,
    stop: &AtomicBool,
    stats: &Mutex<WorkerStats>,
) where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    while !stop.load(Ordering::SeqCst) {
        match worker.promote_due(config.promote_batch) {
            Ok(0) => {}
            Ok(n) => lock_stats(stats).retries_promoted += n as u64,
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to promote due retries");
                lock_stats(stats).store_errors += 1;
            }
        }
        sleep_unless_stopped(config.promote_interval, stop);
    }

    info!(worker = %config.name, "worker stopped");
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(50);
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));
    }
}
