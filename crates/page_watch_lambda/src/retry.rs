use std::fmt;
use std::future::Future;
use std::time::Duration;

use page_watch_core::retry::{RetryPolicy, Retryable};
use thiserror::Error;
use tracing::warn;

/// A single external call ran past its timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimedOut(pub Duration);

#[derive(Debug, Clone, Error)]
#[error("{last_error} (after {attempts} attempt(s))")]
pub struct AttemptsExhausted<E: fmt::Display + fmt::Debug> {
    pub attempts: u32,
    pub last_error: E,
}

pub async fn with_timeout<T, E, Fut>(limit: Duration, call: Fut) -> Result<T, E>
where
    Fut: Future<Output = Result<T, E>>,
    E: From<CallTimedOut>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(E::from(CallTimedOut(limit))),
    }
}

/// Runs `call` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. Every attempt is bounded by `call_timeout`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    call_timeout: Duration,
    operation: &str,
    mut call: F,
) -> Result<T, AttemptsExhausted<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + From<CallTimedOut> + fmt::Display + fmt::Debug,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let error = match with_timeout(call_timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() || !policy.allows_another(attempt) {
            return Err(AttemptsExhausted {
                attempts: attempt,
                last_error: error,
            });
        }

        let delay = error
            .retry_after()
            .unwrap_or_else(|| policy.backoff_after(attempt))
            .min(policy.max_backoff);
        warn!(
            operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying after failure"
        );
        tokio::time::sleep(delay).await;
    }
}
