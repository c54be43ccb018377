//! Bounded retry-with-backoff around one remote call, gated by the shared
//! rate limiter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cancel::CancelFlag;
use crate::limiter::RateLimiter;

/// Retries after the first attempt; six attempts total at the default.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Terminal outcome of an invocation. Exhausted retries are a value, not an
/// error: the worker pool must keep draining when a task's provider is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Completed(String),
    /// All attempts failed; carries the last error's description.
    Exhausted { error: String },
    /// Cancellation observed; no further attempts were made.
    Interrupted,
}

pub struct RetryingInvoker {
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl RetryingInvoker {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(limiter: Arc<RateLimiter>, max_retries: u32) -> Self {
        Self {
            limiter,
            max_retries,
        }
    }

    /// Run `call` under the rate gate. Failures back off linearly (2s, 4s, ...)
    /// before the next attempt; cancellation cuts through the gate, the call,
    /// and the backoff sleep without another attempt.
    pub async fn invoke<F, Fut>(&self, cancel: &CancelFlag, mut call: F) -> CallOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let mut attempt: u32 = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return CallOutcome::Interrupted,
                _ = self.limiter.acquire() => {}
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return CallOutcome::Interrupted,
                result = call() => result,
            };
            let error = match result {
                Ok(text) => return CallOutcome::Completed(text),
                Err(error) => error,
            };
            if attempt == self.max_retries {
                return CallOutcome::Exhausted {
                    error: format!("{error:#}"),
                };
            }
            attempt += 1;
            let backoff = Duration::from_secs(u64::from(attempt) * 2);
            warn!(attempt, backoff_secs = backoff.as_secs(), error = %error, "call failed, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return CallOutcome::Interrupted,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn invoker() -> RetryingInvoker {
        // A window wide enough that the limiter never delays these tests.
        RetryingInvoker::new(Arc::new(RateLimiter::new(1000, Duration::from_secs(1))))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_failures_with_linear_backoff() {
        let invoker = invoker();
        let cancel = CancelFlag::new();
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let outcome = invoker
            .invoke(&cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        anyhow::bail!("transient failure {n}")
                    }
                    Ok("ok".to_string())
                }
            })
            .await;

        assert_eq!(outcome, CallOutcome::Completed("ok".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Exactly three backoff sleeps: 2 + 4 + 6 seconds.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_into_a_terminal_value_not_an_error() {
        let invoker = invoker();
        let cancel = CancelFlag::new();
        let calls = AtomicU32::new(0);

        let outcome = invoker
            .invoke(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { anyhow::bail!("provider down") }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 6);
        match outcome {
            CallOutcome::Exhausted { error } => assert!(error.contains("provider down")),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_skips_the_backoff() {
        let invoker = invoker();
        let cancel = CancelFlag::new();
        let calls = AtomicU32::new(0);

        let cancel_after_first = cancel.clone();
        let outcome = invoker
            .invoke(&cancel, || {
                calls.fetch_add(1, Ordering::SeqCst);
                cancel_after_first.cancel();
                async { anyhow::bail!("will not be retried") }
            })
            .await;

        assert_eq!(outcome, CallOutcome::Interrupted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_makes_no_attempt() {
        let invoker = invoker();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let outcome = invoker
            .invoke(&cancel, || async { Ok("never called".to_string()) })
            .await;
        assert_eq!(outcome, CallOutcome::Interrupted);
    }
}
