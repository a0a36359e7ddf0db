//! Shared retry/backoff helper for upstream provider calls.
//!
//! The helper owns no state; it inspects the [`UpstreamError`] variant to
//! decide whether another attempt is allowed. HTTP 429 is never retried so
//! quota exhaustion surfaces to the caller immediately, which doubles as
//! the server's backpressure signal.

use std::future::Future;
use std::time::{Duration, Instant};

use proto::UpstreamError;
use rand::Rng;
use tracing::{debug, warn};

/// Backoff parameters shared by every provider
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound applied to a server-sent `Retry-After` value.
    pub retry_after_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_after_cap: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the next attempt after `attempt` (1-based) failed.
    ///
    /// Exponential with jitter; a numeric `Retry-After` overrides the
    /// computed delay, still capped.
    fn delay_after(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs).min(self.retry_after_cap);
        }
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1_000));
        exp + jitter
    }
}

/// Runs `op` until it succeeds, fails non-retryably, or exhausts attempts.
///
/// `op` receives the 1-based attempt number. `model` is only used for logs.
pub async fn execute<T, F, Fut>(
    policy: &RetryPolicy,
    model: &str,
    mut op: F,
) -> Result<T, UpstreamError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let started = Instant::now();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                debug!(
                    attempt,
                    model,
                    elapsed_ms = %started.elapsed().as_millis(),
                    "upstream call succeeded"
                );
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt, err.retry_after());
                warn!(
                    attempt,
                    model,
                    elapsed_ms = %started.elapsed().as_millis(),
                    delay_ms = %delay.as_millis(),
                    error = %err,
                    "retryable upstream failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                debug!(
                    attempt,
                    model,
                    elapsed_ms = %started.elapsed().as_millis(),
                    error = %err,
                    "upstream call failed"
                );
                return Err(err);
            }
        }
    }
}

/// Applies the per-request soft deadline around a whole retry loop.
/// Expiry aborts the in-flight call and maps to [`UpstreamError::Timeout`].
pub async fn with_deadline<T, Fut>(deadline: Duration, fut: Fut) -> Result<T, UpstreamError>
where
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let started = Instant::now();
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout {
            elapsed_ms: started.elapsed().as_millis() as u64,
        }),
    }
}
