//! Built-in channel handlers.
//!
//! Transports are external; these handlers check the fields each channel
//! needs and log the delivery.

use herald_core::Job;
use herald_infra::jobs::{JobOutcome, Worker};
use herald_infra::{ListStore, ScheduleStore};

/// Payload fields each built-in channel requires.
const CHANNELS: &[(&str, &[&str])] = &[
    ("email", &["subject"]),
    ("sms", &["body"]),
    ("push", &["title"]),
];

pub fn register_builtin<S>(worker: &mut Worker<S>)
where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    for &(channel, required) in CHANNELS {
        worker.register_handler(channel, move |job| deliver(channel, required, job));
    }
}

fn deliver(channel: &str, required: &[&str], job: &Job) -> JobOutcome {
    if job.target_id <= 0 {
        return JobOutcome::failed(format!("invalid target id: {}", job.target_id));
    }
    if let Some(missing) = required.iter().find(|f| !job.payload.contains_key(**f)) {
        return JobOutcome::failed(format!("{channel} payload missing field: {missing}"));
    }

    tracing::info!(
        job_id = %job.id,
        channel,
        target_id = job.target_id,
        attempt = job.attempt,
        "notification delivered"
    );
    JobOutcome::Delivered
}
