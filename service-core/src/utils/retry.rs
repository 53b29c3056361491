//! Retry utilities for optimistic writes.
//!
//! Operations that read a versioned record, compute a new state and write it
//! back conditionally fail with [`AppError::ConcurrentModification`] when
//! another writer got there first. [`retry_on_conflict`] re-runs the whole
//! read-compute-write closure with exponential backoff until it succeeds, fails
//! with a non-retryable error, or runs out of attempts.

use crate::error::AppError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial backoff duration before first retry.
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff duration.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the specified max retries.
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Calculate backoff duration for a given attempt.
    fn backoff_duration(&self, attempt: u32) -> Duration {
        let backoff =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff.min(self.max_backoff.as_millis() as f64) as u64;

        let mut duration = Duration::from_millis(backoff_ms);

        if self.add_jitter {
            // Up to 25% jitter so racing writers spread out
            let jitter = (backoff_ms as f64 * 0.25 * rand::thread_rng().r#gen::<f64>()) as u64;
            duration += Duration::from_millis(jitter);
        }

        duration
    }
}

/// Run `f` until it succeeds or fails with an error that is not
/// [`AppError::is_retryable`].
///
/// # Example
/// ```ignore
/// let invoice = retry_on_conflict(&config, "apply_balance_change", || async move {
///     ledger.try_apply(invoice_id, delta).await
/// })
/// .await?;
/// ```
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    f: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        "Write succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt >= config.max_retries {
                    warn!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        error = %err,
                        "Write failed after max retries"
                    );
                    return Err(err);
                }

                let backoff = config.backoff_duration(attempt);
                debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "Concurrent modification, retrying after backoff"
                );

                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
