//! Retry logic with exponential backoff

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Error;
use crate::config::HttpConfig;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay (`delay = backoff_factor * 2^attempt`)
    pub backoff_factor: Duration,
    /// Maximum single delay
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            max_retries: config.retries,
            backoff_factor: config.backoff_factor,
            max_backoff: config.max_backoff,
        }
    }

    /// A policy that never retries
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_factor: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Create an exponential backoff instance
    #[must_use]
    pub fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBuilder::default()
            .with_min_delay(self.backoff_factor)
            .with_max_delay(self.max_backoff.max(self.backoff_factor))
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .build()
    }
}

/// Execute a future with retry logic
///
/// Only errors for which [`Error::is_retryable`] holds are retried. A
/// cancelled `cancel` token aborts the wait between attempts with
/// [`Error::Cancelled`].
///
/// # Errors
///
/// Returns the last error from `f` if all retry attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    name: &str,
    cancel: Option<&CancellationToken>,
    mut f: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut backoff = policy.create_backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        let outcome = match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled(name.to_string())),
                r = f() => r,
            },
            None => f().await,
        };

        let e = match outcome {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !e.is_retryable() {
            return Err(e);
        }

        let Some(duration) = backoff.next() else {
            debug!(operation = name, attempts, "Max retry attempts reached");
            return Err(e);
        };

        debug!(
            operation = name,
            attempt = attempts,
            delay_ms = duration.as_millis(),
            error = %e,
            "Retrying after backoff"
        );

        match cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => return Err(Error::Cancelled(name.to_string())),
                () = sleep(duration) => {}
            },
            None => sleep(duration).await,
        }
    }
}
