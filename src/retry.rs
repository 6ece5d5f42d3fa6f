use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::Result;

/// Caller-side retry for transient provider failures.
///
/// Nothing inside the crate retries on its own; wrap a completion or a whole
/// prompt in [`RetryPolicy::retry`] where a retry is acceptable.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_external_call()
    }
}

impl RetryPolicy {
    pub fn default_external_call() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }

    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Backoff grows linearly with the attempt number.
    pub async fn retry<F, Fut, T>(&self, mut f: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    warn!(attempt, error = %err, "retrying after transient failure");
                    attempt += 1;
                    sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
