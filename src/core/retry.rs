//! Retry logic with fixed or exponential backoff.
//!
//! Provides configurable retry strategies for:
//! - Permanent photo uploads (fixed pause, bounded attempts)
//! - Broker reconnects (doubling delay with a ceiling, unbounded)

use crate::core::config;
use crate::core::error::AppError;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Retry-related errors.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// All retries exhausted
    #[error("Max retries ({max_retries}) exhausted")]
    MaxRetriesExhausted { max_retries: u32, last_error: E },
}

/// Retry strategy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try)
    pub max_retries: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Retry every error, ignoring [`Retryable::is_retryable`]
    pub retry_all_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            retry_all_errors: false,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of retries.
    #[must_use]
    pub fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Calculates delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Predefined retry configs for different scenarios.
impl RetryConfig {
    /// Permanent photo upload: 5 attempts total, 1 second apart, any error.
    pub fn upload() -> Self {
        Self {
            max_retries: config::photos::UPLOAD_ATTEMPTS - 1,
            initial_delay: config::photos::upload_pause(),
            max_delay: config::photos::upload_pause(),
            backoff_multiplier: 1.0,
            retry_all_errors: true,
        }
    }

    /// Broker reconnect: 1s doubling up to 30s, never gives up.
    pub fn reconnect() -> Self {
        Self {
            max_retries: u32::MAX,
            initial_delay: config::broker::initial_backoff(),
            max_delay: config::broker::max_backoff(),
            backoff_multiplier: 2.0,
            retry_all_errors: true,
        }
    }
}

/// Stateful delay sequence for supervisory loops.
///
/// Each call to [`Backoff::next_delay`] returns the delay for the current
/// consecutive failure and advances; [`Backoff::reset`] starts over.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    failures: u32,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, failures: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for_attempt(self.failures);
        self.failures = self.failures.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Result of a retry attempt.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The final result (success or last error)
    pub result: Result<T, RetryError<E>>,
    /// Number of attempts made
    pub attempts: u32,
    /// Total time spent retrying
    pub total_duration: Duration,
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true if all retries were exhausted.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.result, Err(RetryError::MaxRetriesExhausted { .. }))
    }

    /// Returns the value, or the last error seen.
    pub fn into_result(self) -> Result<T, E> {
        match self.result {
            Ok(value) => Ok(value),
            Err(RetryError::MaxRetriesExhausted { last_error, .. }) => Err(last_error),
        }
    }
}

/// Determines if an error is retryable.
pub trait Retryable {
    /// Returns true if the error should be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for AppError {
    fn is_retryable(&self) -> bool {
        !matches!(self, AppError::Validation(_) | AppError::Url(_))
    }
}

/// Executes an async operation with retry logic.
///
/// # Arguments
/// * `config` - Retry configuration
/// * `operation` - The async operation to execute
///
/// # Returns
/// A `RetryResult` containing either the successful result or the last error.
pub async fn retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> RetryResult<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let start = std::time::Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    result: Ok(value),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
            Err(e) if attempts <= config.max_retries && (config.retry_all_errors || e.is_retryable()) => {
                let delay = config.delay_for_attempt(attempts - 1);

                log::warn!(
                    "Attempt {}/{} failed (retrying in {:?}): {}",
                    attempts,
                    config.max_retries.saturating_add(1),
                    delay,
                    e
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult {
                    result: Err(RetryError::MaxRetriesExhausted {
                        max_retries: config.max_retries,
                        last_error: e,
                    }),
                    attempts,
                    total_duration: start.elapsed(),
                };
            }
        }
    }
}
