//! Retry policy and per-attempt bookkeeping
//!
//! Delays grow exponentially with multiplicative jitter:
//! `delay = base * 2^(attempt-1) * (1 + U(0, jitter_fraction))`.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Shared, read-only retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound on attempts per engine or URL, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt, before jitter
    pub base_backoff: Duration,
    /// Maximum extra delay as a fraction of the exponential delay
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            jitter_fraction: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, jitter_fraction: f64) -> Self {
        Self {
            max_attempts,
            base_backoff,
            jitter_fraction,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30);
        let base = self.base_backoff.as_secs_f64() * f64::from(1u32 << exponent);
        let jitter = if self.jitter_fraction > 0.0 {
            rng.gen_range(0.0..=self.jitter_fraction)
        } else {
            0.0
        };
        Duration::from_secs_f64(base * (1.0 + jitter))
    }

    /// Largest delay this policy can ever produce
    pub fn max_backoff(&self) -> Duration {
        if self.max_attempts < 2 {
            return Duration::ZERO;
        }
        let exponent = (self.max_attempts - 2).min(30);
        let base = self.base_backoff.as_secs_f64() * f64::from(1u32 << exponent);
        Duration::from_secs_f64(base * (1.0 + self.jitter_fraction.max(0.0)))
    }

    /// Whether another attempt may follow attempt number `attempt`
    pub fn allows_retry(&self, outcome: AttemptOutcome, attempt: u32) -> bool {
        outcome.is_retryable() && attempt < self.max_attempts
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if !(0.0..=10.0).contains(&self.jitter_fraction) {
            return Err(format!("jitter_fraction {} out of range", self.jitter_fraction));
        }
        Ok(())
    }
}

/// Build the jitter source for one task
///
/// With a seed, each task gets its own deterministic stream so delays do not
/// depend on scheduling order.
pub fn jitter_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))),
        None => StdRng::from_entropy(),
    }
}

/// How a single attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    TransientFailure,
    PermanentFailure,
    Timeout,
}

impl AttemptOutcome {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientFailure | Self::Timeout)
    }
}

/// One attempt against one engine or URL; only lives for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineAttempt {
    pub engine: String,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub latency: Duration,
}
