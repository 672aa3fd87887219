//! Phase-scoped retry policy
//!
//! A [`RetryPolicy`] wraps one phase of a cycle (fetch or push). It re-runs
//! the whole phase on retryable errors, waits a fixed delay between attempts
//! and gives up immediately on errors that a retry cannot fix.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: u32,
    /// Pause between two attempts
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted
    ///
    /// `op` receives the 1-based attempt number. The last error is returned
    /// when every attempt failed. Cancellation is observed during the delay
    /// between attempts and yields [`Error::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        phase: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}/{}", phase, attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!("{} failed with non-retryable error: {}", phase, e);
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!("{} failed after {} attempts: {}", phase, max_attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        phase, attempt, max_attempts, e, self.delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(self.delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = policy
            .run("fetch", &CancellationToken::new(), |attempt| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(Error::feed_unreachable("timeout"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("push", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::remote_transport("connection refused")) }
            })
            .await;

        assert!(matches!(assert_err!(result), Error::RemoteTransport(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .run("push", &CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::remote_auth("Authentication Failure")) }
            })
            .await;

        assert!(matches!(result, Err(Error::RemoteAuth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = policy
            .run("fetch", &cancel, |_| async {
                Err(Error::feed_unreachable("timeout"))
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
