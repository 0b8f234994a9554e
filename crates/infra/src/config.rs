//! Configuration loading and representation.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `HERALD_REDIS_URL` | unset (in-memory store) | Redis connection URL |
//! | `HERALD_QUEUE` | `herald:notifications` | main queue key |
//! | `HERALD_BACKOFF_SECS` | `10,60,300` | backoff table, seconds |
//! | `HERALD_JITTER` | `0.2` | jitter fraction |
//! | `HERALD_DEQUEUE_TIMEOUT_MS` | `1000` | blocking dequeue bound |
//! | `HERALD_WORKERS` | `4` | consuming loops per process |
//! | `HERALD_MAX_ATTEMPTS` | `3` | retry budget for new jobs |
//! | `HERALD_PROMOTE_INTERVAL_MS` | `1000` | retry promotion period |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use herald_core::DEFAULT_MAX_ATTEMPTS;

use crate::jobs::{BackoffSchedule, WorkerConfig};
use crate::jobs::backoff::{DEFAULT_DELAYS, DEFAULT_JITTER};

pub const DEFAULT_QUEUE: &str = "herald:notifications";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    pub redis_url: Option<String>,
    pub queue: String,
    pub backoff: Vec<Duration>,
    pub jitter: f64,
    pub dequeue_timeout: Duration,
    pub workers: usize,
    pub max_attempts: u32,
    pub promote_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            queue: DEFAULT_QUEUE.to_string(),
            backoff: DEFAULT_DELAYS.to_vec(),
            jitter: DEFAULT_JITTER,
            dequeue_timeout: Duration::from_secs(1),
            workers: 4,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            promote_interval: Duration::from_secs(1),
        }
    }
}

fn parse<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: core::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn positive<T: PartialOrd + Default>(var: &'static str, raw: &str, value: T) -> Result<T, ConfigError> {
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(value)
}

impl QueueConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using `lookup` for variable values (unset → default).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = lookup("HERALD_REDIS_URL").filter(|u| !u.trim().is_empty()) {
            cfg.redis_url = Some(url);
        }
        if let Some(queue) = lookup("HERALD_QUEUE").filter(|q| !q.trim().is_empty()) {
            cfg.queue = queue;
        }
        if let Some(raw) = lookup("HERALD_BACKOFF_SECS") {
            cfg.backoff = raw
                .split(',')
                .map(|part| parse::<f64>("HERALD_BACKOFF_SECS", part))
                .map(|secs| {
                    let secs = secs?;
                    if !secs.is_finite() || secs < 0.0 {
                        return Err(ConfigError::Invalid {
                            var: "HERALD_BACKOFF_SECS",
                            value: raw.clone(),
                            reason: "delays must be non-negative".to_string(),
                        });
                    }
                    Ok(Duration::from_secs_f64(secs))
                })
                .collect::<Result<_, _>>()?;
        }
        if let Some(raw) = lookup("HERALD_JITTER") {
            cfg.jitter = parse("HERALD_JITTER", &raw)?;
        }
        if let Some(raw) = lookup("HERALD_DEQUEUE_TIMEOUT_MS") {
            let ms: u64 = parse("HERALD_DEQUEUE_TIMEOUT_MS", &raw)?;
            cfg.dequeue_timeout = Duration::from_millis(positive("HERALD_DEQUEUE_TIMEOUT_MS", &raw, ms)?);
        }
        if let Some(raw) = lookup("HERALD_WORKERS") {
            cfg.workers = positive("HERALD_WORKERS", &raw, parse("HERALD_WORKERS", &raw)?)?;
        }
        if let Some(raw) = lookup("HERALD_MAX_ATTEMPTS") {
            cfg.max_attempts = positive("HERALD_MAX_ATTEMPTS", &raw, parse("HERALD_MAX_ATTEMPTS", &raw)?)?;
        }
        if let Some(raw) = lookup("HERALD_PROMOTE_INTERVAL_MS") {
            let ms: u64 = parse("HERALD_PROMOTE_INTERVAL_MS", &raw)?;
            cfg.promote_interval = Duration::from_millis(positive("HERALD_PROMOTE_INTERVAL_MS", &raw, ms)?);
        }

        // Surface table/jitter problems at load time rather than first failure.
        cfg.backoff_schedule()?;
        Ok(cfg)
    }

    pub fn backoff_schedule(&self) -> Result<BackoffSchedule, ConfigError> {
        BackoffSchedule::new(self.backoff.clone(), self.jitter).map_err(|e| ConfigError::Invalid {
            var: "HERALD_BACKOFF_SECS/HERALD_JITTER",
            value: format!("{:?} ±{}", self.backoff, self.jitter),
            reason: e.to_string(),
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig::default()
            .with_concurrency(self.workers)
            .with_dequeue_timeout(self.dequeue_timeout)
            .with_promote_interval(self.promote_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<QueueConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        QueueConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg, QueueConfig::default());
        assert_eq!(cfg.backoff_schedule().unwrap(), BackoffSchedule::default());
    }

    #[test]
    fn reads_every_variable() {
        let cfg = load(&[
            ("HERALD_REDIS_URL", "redis://cache:6379"),
            ("HERALD_QUEUE", "jobs"),
            ("HERALD_BACKOFF_SECS", "1, 2.5,30"),
            ("HERALD_JITTER", "0.1"),
            ("HERALD_DEQUEUE_TIMEOUT_MS", "250"),
            ("HERALD_WORKERS", "8"),
            ("HERALD_MAX_ATTEMPTS", "5"),
            ("HERALD_PROMOTE_INTERVAL_MS", "500"),
        ])
        .unwrap();

        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(cfg.queue, "jobs");
        assert_eq!(
            cfg.backoff,
            vec![Duration::from_secs(1), Duration::from_millis(2500), Duration::from_secs(30)]
        );
        assert_eq!(cfg.jitter, 0.1);
        assert_eq!(cfg.dequeue_timeout, Duration::from_millis(250));
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.worker_config().concurrency, 8);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(load(&[("HERALD_WORKERS", "zero")]).is_err());
        assert!(load(&[("HERALD_WORKERS", "0")]).is_err());
        assert!(load(&[("HERALD_DEQUEUE_TIMEOUT_MS", "0")]).is_err());
        assert!(load(&[("HERALD_MAX_ATTEMPTS", "0")]).is_err());
        assert!(load(&[("HERALD_BACKOFF_SECS", "10,-1")]).is_err());
        assert!(load(&[("HERALD_JITTER", "1.5")]).is_err());
    }
}
