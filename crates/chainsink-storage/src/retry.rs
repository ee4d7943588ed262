//! Linear-backoff retry policy for transient insert failures.
//!
//! Data inserts retry transient transport errors (connection reset, broken
//! pipe, timeouts, refused connections) up to 3 total attempts with 500 ms
//! and 1 000 ms waits. Everything else fails fast; checkpoint writes are
//! never retried.

use std::time::Duration;

use chainsink_core::SinkError;

/// Stateless retry policy with linear backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff step; the wait before retry `n` is `step * n`.
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Returns the delay before the `attempt`-th retry (1-based), or `None`
    /// once attempts are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt + 1 > self.max_attempts {
            return None;
        }
        Some(self.step * attempt)
    }

    /// Run `op`, retrying transient failures per the policy.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, SinkError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SinkError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    match self.next_delay(attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %e,
                                "transient insert failure, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            tracing::error!(attempt, error = %e, "retries exhausted");
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Message fragments that mark a transport failure as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "connection reset",
    "broken pipe",
    "connect timeout",
    "timed out",
    "connection refused",
    "socket hang up",
];

/// Classify a raw transport error message.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}
