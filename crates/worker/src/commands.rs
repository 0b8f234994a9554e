//! Subcommand implementations, generic over the store backend.

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use herald_core::{Job, Payload};
use herald_events::{EventBus, EventFilter, InMemoryEventBus, Subscription};
use herald_infra::jobs::{JobSystem, OutcomeSink};
use herald_infra::{ListStore, QueueConfig, ScheduleStore};

use crate::cli::{Command, DlqCommand, EnqueueArgs, RunArgs};
use crate::handlers;

pub fn execute<S>(system: JobSystem<S>, config: &QueueConfig, command: Command) -> Result<()>
where
    S: ListStore + ScheduleStore + Clone + Send + Sync + 'static,
{
    match command {
        Command::Run(args) => run(system, config, args),
        Command::Enqueue(args) => enqueue(&system, config, args),
        Command::Stats => {
            let stats = system.stats().context("failed to read queue sizes")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Dlq(cmd) => dlq(&system, cmd),
    }
}

fn run<S>(system: JobSystem<S>, config: &QueueConfig, args: RunArgs) -> Result<()>
where
    S: ListStore + ScheduleStore + Clone + Send + Sync + 'static,
{
    let bus = Arc::new(InMemoryEventBus::new());
    let reactor = spawn_event_logger(bus.subscribe(EventFilter::all()))?;
    let system = system.with_sink(OutcomeSink::from_bus(bus.clone()));

    let mut worker = system.worker();
    handlers::register_builtin(&mut worker);

    let mut worker_config = config.worker_config();
    if let Some(workers) = args.workers {
        worker_config = worker_config.with_concurrency(workers);
    }

    info!(
        queue = %system.queue().key(),
        workers = worker_config.concurrency,
        max_attempts = config.max_attempts,
        "starting herald worker"
    );
    let handle = worker.spawn(worker_config);

    let waited = wait_for_shutdown(args.run_for);
    info!("shutting down; waiting for in-flight jobs");
    let stats = handle.stats();
    handle.shutdown();
    info!(
        processed = stats.jobs_processed,
        delivered = stats.jobs_delivered,
        retried = stats.jobs_retried,
        dead_lettered = stats.jobs_dead_lettered,
        stranded = stats.jobs_stranded,
        store_errors = stats.store_errors,
        events_dropped = bus.dropped(),
        uptime_secs = stats.uptime_secs,
        "herald worker stopped"
    );

    // Dropping every sender disconnects the logger's subscription.
    drop(system);
    drop(bus);
    let _ = reactor.join();

    waited
}

fn spawn_event_logger(sub: Subscription) -> Result<thread::JoinHandle<()>> {
    let join = thread::Builder::new()
        .name("herald-events".to_string())
        .spawn(move || {
            loop {
                match sub.recv_timeout(Duration::from_secs(1)) {
                    Ok(event) => debug!(
                        job_id = %event.job_id(),
                        kind = ?event.kind(),
                        event = %serde_json::to_string(&event).unwrap_or_default(),
                        "job event"
                    ),
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("failed to spawn event logger thread")?;
    Ok(join)
}

/// Block until Ctrl-C, or until `run_for` seconds pass when given.
fn wait_for_shutdown(run_for: Option<u64>) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    rt.block_on(async move {
        match run_for {
            Some(secs) => tokio::select! {
                r = tokio::signal::ctrl_c() => r.context("failed to listen for Ctrl-C"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => Ok(()),
            },
            None => tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C"),
        }
    })
}

fn build_job(config: &QueueConfig, args: EnqueueArgs) -> Result<Job> {
    let payload: Payload =
        serde_json::from_str(&args.payload).context("payload must be a JSON object")?;

    let mut builder = Job::builder(args.channel, args.target_id)
        .payload(payload)
        .max_attempts(args.max_attempts.unwrap_or(config.max_attempts));
    if let Some(id) = args.id {
        builder = builder.id(id);
    }
    Ok(builder.build()?)
}

fn enqueue<S>(system: &JobSystem<S>, config: &QueueConfig, args: EnqueueArgs) -> Result<()>
where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    let job = build_job(config, args)?;
    system
        .queue()
        .enqueue(&job)
        .with_context(|| format!("failed to enqueue job {}", job.id))?;
    info!(job_id = %job.id, channel = %job.channel, queue = %system.queue().key(), "job enqueued");
    println!("{}", job.id);
    Ok(())
}

fn dlq<S>(system: &JobSystem<S>, cmd: DlqCommand) -> Result<()>
where
    S: ListStore + ScheduleStore + Clone + 'static,
{
    let dead_letters = system.dead_letters();
    match cmd {
        DlqCommand::List => {
            let jobs = dead_letters.list().context("failed to list dead letters")?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        DlqCommand::Count => {
            println!("{}", dead_letters.count().context("failed to count dead letters")?);
        }
        DlqCommand::Resurrect { id } => {
            let found = dead_letters
                .resurrect_one(&id)
                .with_context(|| format!("failed to resurrect job {id}"))?;
            if !found {
                anyhow::bail!("job {id} is not in the dead-letter store");
            }
            println!("resurrected {id}");
        }
        DlqCommand::ResurrectAll => {
            let moved = dead_letters
                .resurrect_all()
                .context("failed to resurrect dead letters")?;
            println!("resurrected {moved} job(s)");
        }
    }
    Ok(())
}
