use clap::{Args, Parser, Subcommand};

/// Herald notification worker and queue operator tool.
///
/// Settings come from `HERALD_*` environment variables; flags given here
/// override them.
#[derive(Parser, Debug)]
#[command(name = "herald-worker")]
#[command(version, about = "Notification job queue worker", long_about = None)]
pub struct Cli {
    /// Redis URL (e.g. redis://localhost:6379); in-memory store when unset
    #[arg(long = "redis-url", global = true)]
    pub redis_url: Option<String>,

    /// Main queue key
    #[arg(short = 'q', long = "queue", global = true)]
    pub queue: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start consuming loops and the retry promoter
    Run(RunArgs),

    /// Submit a job
    Enqueue(EnqueueArgs),

    /// Print queue, retry schedule and dead-letter sizes as JSON
    Stats,

    /// Inspect and resurrect dead-lettered jobs
    #[command(subcommand)]
    Dlq(DlqCommand),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Number of consuming loops
    #[arg(short = 'w', long = "workers")]
    pub workers: Option<usize>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long = "for")]
    pub run_for: Option<u64>,
}

#[derive(Args, Debug)]
pub struct EnqueueArgs {
    /// Delivery channel (email, sms, push)
    #[arg(short = 'c', long = "channel")]
    pub channel: String,

    /// Recipient id
    #[arg(short = 't', long = "target-id")]
    pub target_id: i64,

    /// Channel-specific payload as a JSON object
    #[arg(short = 'p', long = "payload", default_value = "{}")]
    pub payload: String,

    /// Job id (generated when omitted)
    #[arg(long = "id")]
    pub id: Option<String>,

    /// Retry budget (defaults to HERALD_MAX_ATTEMPTS)
    #[arg(long = "max-attempts")]
    pub max_attempts: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// Print every dead-lettered job as JSON, newest first
    List,

    /// Print the number of dead-lettered jobs
    Count,

    /// Move one job back onto the main queue with a fresh retry budget
    Resurrect {
        /// Id of the dead-lettered job
        id: String,
    },

    /// Move every dead-lettered job back onto the main queue
    ResurrectAll,
}
