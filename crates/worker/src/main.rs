mod cli;
mod commands;
mod handlers;

use anyhow::{Context, Result};
use clap::Parser;

use herald_infra::jobs::JobSystem;
use herald_infra::{InMemoryStore, QueueConfig};

use crate::cli::Cli;

fn main() -> Result<()> {
    herald_observability::init();

    let cli = Cli::parse();
    let mut config = QueueConfig::from_env().context("invalid HERALD_* configuration")?;
    if let Some(url) = cli.redis_url {
        config.redis_url = Some(url);
    }
    if let Some(queue) = cli.queue {
        config.queue = queue;
    }
    let backoff = config.backoff_schedule()?;

    match config.redis_url.clone() {
        #[cfg(feature = "redis")]
        Some(url) => {
            let store = herald_infra::store::RedisStore::new(&url)
                .with_context(|| format!("invalid redis url {url}"))?;
            let system = JobSystem::new(store, config.queue.clone(), backoff);
            commands::execute(system, &config, cli.command)
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("HERALD_REDIS_URL is set but this build has no redis support"),
        None => {
            tracing::warn!("HERALD_REDIS_URL not set; using a process-local in-memory store");
            let system = JobSystem::new(InMemoryStore::arc(), config.queue.clone(), backoff);
            commands::execute(system, &config, cli.command)
        }
    }
}
