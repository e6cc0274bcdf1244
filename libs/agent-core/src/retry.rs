use crate::{
    classify::{ErrorClass, RetryClassify, classify},
    types::RetryConfig,
};
use std::{future::Future, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("operation cancelled")]
    Cancelled,

    #[error("giving up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    #[error("{source}")]
    Failed {
        class: ErrorClass,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The last error returned by the operation, if it ran at all.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Exhausted { source, .. } | RetryError::Failed { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Details of a retry about to happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    /// 1-indexed number of the retry.
    pub attempt: u32,
    pub delay: Duration,
    pub reason: String,
}

/// Backoff before retry `attempt` (1-indexed, clamped to at least 1):
/// `min(base * 2^(attempt-1), max)`.
pub fn backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

pub async fn with_retry<T, E, F, Fut>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    operation: F,
) -> Result<T, RetryError<E>>
where
    E: RetryClassify + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_notify(cancel, config, operation, |_| {}).await
}

/// Run `operation` until it succeeds, fails permanently or runs out of
/// attempts. `on_retry` is called before every backoff sleep.
pub async fn with_retry_notify<T, E, F, Fut, N>(
    cancel: &CancellationToken,
    config: &RetryConfig,
    mut operation: F,
    mut on_retry: N,
) -> Result<T, RetryError<E>>
where
    E: RetryClassify + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    N: FnMut(&RetryAttempt),
{
    let total_attempts = if config.enabled && config.max_attempts > 0 {
        config.max_attempts.saturating_add(1)
    } else {
        1
    };

    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let class = classify(Some(&error));
        if !class.is_retryable() {
            return Err(RetryError::Failed {
                class,
                source: error,
            });
        }

        if attempt >= total_attempts {
            if total_attempts == 1 {
                return Err(RetryError::Failed {
                    class,
                    source: error,
                });
            }
            return Err(RetryError::Exhausted {
                attempts: attempt,
                source: error,
            });
        }

        let retry = RetryAttempt {
            attempt,
            delay: backoff(attempt, config.backoff_base, config.backoff_max),
            reason: error.to_string(),
        };

        tracing::warn!(
            attempt = retry.attempt,
            delay_ms = retry.delay.as_millis() as u64,
            "retryable failure: {}",
            retry.reason
        );
        on_retry(&retry);

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(retry.delay) => {}
        }
    }
}
