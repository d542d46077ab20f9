//! Bounded retry with exponential backoff.
//!
//! Used for operations that depend on a cluster that may not be ready
//! yet (connecting the admin client during bootstrap, for example).
//! Only errors accepted by the caller's predicate are retried; anything
//! else is returned immediately. When attempts run out the last error is
//! returned as-is.
//!
//! Retried operations must be safe to invoke more than once.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

/// Backoff function: retry number (1-based) to delay before that retry.
pub type BackoffFn = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `2^retry` seconds, uncapped.
pub fn exponential_backoff(retry: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(retry))
}

/// How many times to try an operation and how long to wait in between.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: BackoffFn,
}

impl RetryPolicy {
    /// Exponential policy (`2^retry` seconds) with `max_attempts` total
    /// attempts, the first one included.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::with_backoff(max_attempts, exponential_backoff)
    }

    /// Policy with a custom backoff function.
    pub fn with_backoff<F>(max_attempts: u32, backoff: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Arc::new(backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay applied before the given retry (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        (self.backoff)(retry)
    }

    /// Sum of every delay the policy can incur.
    pub fn worst_case_delay(&self) -> Duration {
        (1..self.max_attempts).map(|r| self.delay_for(r)).sum()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// Run `operation` under `policy`.
///
/// The first attempt runs immediately. Before retry `n` the executor
/// sleeps for `policy.delay_for(n)`.
pub async fn execute<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay = ?delay,
                    error = %e,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
