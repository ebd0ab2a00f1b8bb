//! Bounded retry with exponential backoff and jitter for gateway calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::GatewayError;

/// Retry settings applied to every remote call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Timeout for each individual attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (attempt is 1-based), without jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to 25% random jitter. A server-provided `retry_after`
    /// wins when it is longer.
    fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let base = self.backoff(attempt);
        let jitter_ms = (base.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let delay = base + jitter;
        match retry_after {
            Some(floor) if floor > delay => floor,
            _ => delay,
        }
    }

    /// Upper bound on one full `run`: every attempt timing out plus the
    /// longest backoff between each. Saturates instead of overflowing.
    pub fn total_budget(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        self.call_timeout
            .saturating_add(self.max_delay)
            .saturating_mul(attempts)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Each attempt is bounded by `call_timeout`; an elapsed attempt counts
    /// as a transient failure.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::transient(
                    operation,
                    format!("timed out after {:?}", self.call_timeout),
                )),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err @ GatewayError::Permanent { .. }) => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    warn!(operation, attempts = attempt, error = %err, "Gateway retries exhausted");
                    return Err(err);
                }
                Err(err) => {
                    let retry_after = match &err {
                        GatewayError::Transient { retry_after, .. } => *retry_after,
                        GatewayError::Permanent { .. } => None,
                    };
                    let delay = self.delay_for(attempt, retry_after);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient gateway failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
