//! Transport-level retry for page fetches.
//!
//! Only the HTTP call is retried; pagination, decoding and aggregation never
//! retry. Delays grow exponentially with jitter, capped at `max_delay`.

use latreport_common::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry policy applied by `HttpLogFetcher` to each page request.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first try (minimum 1).
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Backoff delay before retrying after `attempt` (1-based) failed.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let multiplier = 2_u32.saturating_pow(attempt - 1) as f64;
        let mut delay = (self.base_delay.as_secs_f64() * multiplier).min(self.max_delay.as_secs_f64());

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = rand::thread_rng().gen_range(-1.0..=1.0) * self.jitter.min(1.0);
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn run_with_retry<F, Fut, T>(what: &str, policy: &RetryPolicy, mut op: F) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.backoff_delay(attempt);
                warn!(what, attempt, max_attempts, ?delay, error = %err, "Retrying after transient failure");
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(what, attempt, error = %err, "Giving up");
                return Err(err);
            }
        }
    }
}
