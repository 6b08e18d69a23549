//! Bounded retries with exponential backoff for ledger calls.

use crate::error::Result;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
            multiplier: 2.0,
        }
    }
}

/// Outcome of one attempt.
pub enum Attempt<T> {
    Done(T),
    /// Not ready yet; try again after the backoff.
    Retry,
}

impl RetryPolicy {
    /// A policy that tries once and never sleeps.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }

    /// Runs `op` until it reports `Done`, fails, or the attempts are exhausted.
    ///
    /// Errors from `op` propagate immediately; only `Attempt::Retry` is retried.
    /// Returns `Ok(None)` when every attempt asked for a retry.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            if let Attempt::Done(value) = op().await? {
                return Ok(Some(value));
            }
            if attempt < attempts {
                let delay = self.delay_for_attempt(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                tokio::time::sleep(delay).await;
            }
        }
        Ok(None)
    }
}
