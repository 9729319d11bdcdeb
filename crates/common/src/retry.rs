use crate::config::RetrySettings;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Delay before retrying after the failure of `attempt` (0-based): `base × 2^attempt`, capped.
pub fn next_retry_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let multiplier = 2_u64.saturating_pow(attempt);
    let delay = base_ms.saturating_mul(multiplier);
    Duration::from_millis(delay.min(max_ms))
}

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

/// Terminal outcome of [`retry_async`] when the operation never succeeded.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
    /// A non-retryable error stopped the loop after `attempts` attempts.
    Aborted { attempts: u32, error: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            RetryError::Aborted { error, .. } => write!(f, "{}", error),
        }
    }
}

/// Execute an async operation, retrying failures that `classify` marks as retryable.
///
/// Runs at most `settings.max_attempts` times and never sleeps after the final attempt.
/// The backoff sleep suspends only the calling task.
pub async fn retry_async<T, E, C, F, Fut>(
    operation_name: &str,
    settings: RetrySettings,
    classify: C,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    C: Fn(&E) -> RetryDecision,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = settings.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let attempts = attempt + 1;
                if classify(&e) == RetryDecision::Abort {
                    return Err(RetryError::Aborted { attempts, error: e });
                }
                if attempts >= max_attempts {
                    error!(
                        "Failed to execute '{}' after {} attempts: {}",
                        operation_name, attempts, e
                    );
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                let delay = next_retry_delay(attempt, settings.base_delay_ms, settings.max_delay_ms);
                warn!(
                    "Operation '{}' failed. Retrying in {:?} (Attempt {}/{}): {}",
                    operation_name, delay, attempts, max_attempts, e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
