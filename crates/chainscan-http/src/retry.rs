//! Backoff between attempts of a failed node request.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff settings of the node client, read from `[node.retry]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first request; 0 sends every request once.
    pub max_retries: u32,
    /// Wait before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound of any single wait, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive waits.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// The wait schedule derived from a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Wait before retry number `attempt` (counting from 1), or `None` once
    /// the retries are used up.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if !(1..=self.config.max_retries).contains(&attempt) {
            return None;
        }
        let cap = self.config.max_backoff_ms;
        let mut wait = self.config.initial_backoff_ms.min(cap);
        for _ in 1..attempt {
            wait = (wait as f64 * self.config.multiplier).min(cap as f64) as u64;
        }
        Some(Duration::from_millis(wait))
    }
}
