//! Retry policy with bounded exponential backoff
//!
//! The runtime retries transient read, publish, flush and commit failures
//! locally. Each retry cycle gets a fresh [`Backoff`]; once it is exhausted the
//! error is surfaced and the connector fails.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries (not including the initial attempt)
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// Multiplier applied per retry (2.0 doubles the delay)
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry policy for offset commits: two retries per commit cycle
    pub fn commit_default() -> Self {
        Self {
            max_retries: 2,
            ..Default::default()
        }
    }

    /// Create a retry config with no retries (fail immediately)
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set max retries (builder pattern)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial backoff (builder pattern)
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Delay before retry number `retry` (1-indexed)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        // cap the exponent so powi stays finite
        let exponent = retry.min(30) as i32 - 1;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);

        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Start a new retry cycle
    pub fn backoff(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            retries: 0,
        }
    }
}

/// Retry budget for a single operation
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    retries: u32,
}

impl Backoff {
    /// Delay before the next retry, or `None` once the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_retries {
            return None;
        }
        self.retries += 1;
        Some(self.config.delay_for_retry(self.retries))
    }

    /// Retries handed out so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}
