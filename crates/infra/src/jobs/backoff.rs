//! Retry backoff schedule.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use herald_core::{DomainError, DomainResult};

/// Default base delays: 10s, 1m, 5m.
pub const DEFAULT_DELAYS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(60),
    Duration::from_secs(300),
];

/// Default jitter: ±20%.
pub const DEFAULT_JITTER: f64 = 0.2;

/// Table-driven backoff with uniform jitter.
///
/// Attempt `a` (1-indexed) uses `delays[min(a - 1, len - 1)]`; attempts past
/// the end of the table reuse the last entry. The final delay is drawn
/// uniformly from `[base × (1 - jitter), base × (1 + jitter)]` so jobs that
/// failed together do not come back together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBackoff")]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
    jitter: f64,
}

/// Unchecked wire shape; every deserialized schedule goes through `new`.
#[derive(Deserialize)]
struct RawBackoff {
    delays: Vec<Duration>,
    jitter: f64,
}

impl TryFrom<RawBackoff> for BackoffSchedule {
    type Error = DomainError;

    fn try_from(raw: RawBackoff) -> DomainResult<Self> {
        Self::new(raw.delays, raw.jitter)
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            delays: DEFAULT_DELAYS.to_vec(),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl BackoffSchedule {
    /// Build a schedule. The table must be non-empty and `jitter` in `[0, 1)`.
    pub fn new(delays: Vec<Duration>, jitter: f64) -> DomainResult<Self> {
        if delays.is_empty() {
            return Err(DomainError::validation("backoff table must not be empty"));
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(DomainError::validation(format!(
                "jitter must be in [0, 1), got {jitter}"
            )));
        }
        Ok(Self { delays, jitter })
    }

    /// Same delay for every attempt, no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            delays: vec![delay],
            jitter: 0.0,
        }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Un-jittered delay for `attempt` (1-indexed; 0 is treated as 1).
    pub fn base_for_attempt(&self, attempt: u32) -> Duration {
        let idx = (attempt.saturating_sub(1) as usize).min(self.delays.len() - 1);
        self.delays[idx]
    }

    /// Inclusive bounds the jittered delay for `attempt` falls in.
    pub fn bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_for_attempt(attempt);
        (base.mul_f64(1.0 - self.jitter), base.mul_f64(1.0 + self.jitter))
    }

    /// Jittered delay for `attempt`, using the thread-local RNG.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::rng())
    }

    pub fn delay_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_for_attempt(attempt);
        if self.jitter == 0.0 {
            return base;
        }
        let factor = rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }
}
