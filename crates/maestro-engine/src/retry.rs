// ABOUTME: Bounded retry with exponential backoff, and a hard timeout for one attempt.
// ABOUTME: The step executor retries the timeout-wrapped invocation as one unit.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::StepError;

/// Delay before the retry that follows failed attempt number `attempt` (1-based).
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor)
}

/// Run `op` up to `max_attempts` times (at least once).
///
/// `op` receives the 1-based attempt number. Before each retry `on_retry` is
/// called with the failed attempt number, its error, and the delay about to
/// be slept. The last error is returned once attempts are exhausted.
pub async fn with_retry<T, E, Op, Fut, OnRetry>(
    max_attempts: u32,
    base_delay: Duration,
    mut op: Op,
    mut on_retry: OnRetry,
) -> Result<T, E>
where
    E: Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    OnRetry: FnMut(u32, &E, Duration),
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                let delay = backoff_delay(base_delay, attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "attempt failed, retrying"
                );
                on_retry(attempt, &error, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

/// Race `future` against a timer. When the timer wins the future is dropped
/// and its eventual result discarded.
pub async fn with_timeout<T, F>(future: F, limit: Duration) -> Result<T, StepError>
where
    F: Future<Output = Result<T, StepError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(StepError::TimedOut(limit)),
    }
}
