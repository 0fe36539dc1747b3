//! # Retry Policy
//!
//! Linear backoff shared by every retry loop in the engine.
//!
//! ```text
//! attempt 1 ──✗──► wait base×1 ──► attempt 2 ──✗──► wait base×2 ──► attempt 3 ──✗──► Err(last)
//! ```
//!
//! Every error is retried until the policy runs out of attempts; the last
//! error is then returned. Whether a failure is worth another try is the
//! caller's call: only wrap operations that are safe to repeat.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::{debug, warn};

use crate::error::SyncResult;

/// `delay = base × attempt`, stopping after `max_attempts` tries.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    base: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    /// ## Arguments
    /// * `base` - Delay before the first retry
    /// * `max_attempts` - Total tries including the first one (minimum 1)
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        LinearBackoff {
            base,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt >= self.max_attempts {
            None
        } else {
            Some(self.base * self.attempt)
        }
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Runs `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the 1-based attempt number. The policy is reset before the
/// first attempt, so one policy can serve many calls.
pub async fn retry_async<T, F, Fut>(
    policy: &mut LinearBackoff,
    operation: &str,
    mut op: F,
) -> SyncResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SyncResult<T>>,
{
    policy.reset();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => match policy.next_backoff() {
                Some(delay) => {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        kind = err.kind(),
                        transient = err.is_retryable(),
                        error = %err,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    warn!(operation, attempt, error = %err, "Retries exhausted");
                    return Err(err);
                }
            },
        }
    }
}

/// A retryable error, handy when a fake needs to fail on purpose.
#[cfg(test)]
pub(crate) fn transient(message: &str) -> crate::error::SyncError {
    crate::error::SyncError::ConnectionFailed(message.to_string())
}
