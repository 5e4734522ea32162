//! Retry logic with exponential backoff
//!
//! This module wraps fallible async operations with bounded retries. Delays
//! grow exponentially (`base_delay * multiplier^n`, capped at `max_delay`)
//! with optional additive jitter in `[0, 1s)` to prevent thundering herd.
//! Rate-limit failures that carry a `retry_after` hint force the wait up to
//! at least that hint.
//!
//! # Example
//!
//! ```no_run
//! use media_dl::retry::{IsRetryable, RetryAfter, execute_with_retry};
//! use media_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! impl RetryAfter for MyError {}
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let result = execute_with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! })
//! .await
//! .map_err(|failure| failure.error)?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Upper bound of the additive jitter window
const JITTER_WINDOW: Duration = Duration::from_secs(1);

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection resets, rate limits)
/// should return `true`. Permanent failures (validation errors, size limits,
/// unsupported URLs) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Trait for errors that may carry a server-mandated minimum wait
pub trait RetryAfter {
    /// The minimum delay the remote side asked us to wait, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Implementation of IsRetryable for our Error type
impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Transient transport conditions
            Error::Network(_) | Error::Timeout { .. } | Error::RateLimit { .. } => true,
            // Metadata extraction is retryable only when caused by the network
            Error::MetadataExtraction { transient, .. } => *transient,
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Validation and policy failures are permanent
            Error::UrlValidation(_) | Error::UnsupportedUrl(_) | Error::FileTooLarge { .. } => {
                false
            }
            // The terminal wrapper already represents exhausted retries
            Error::DownloadFailed { .. } => false,
            // Cancellation must not restart work
            Error::Cancelled => false,
            // Shutdown in progress - not retryable
            Error::ShuttingDown => false,
            Error::TaskNotFound(_) => false,
            // Config errors are permanent
            Error::Config { .. } => false,
            // Untyped errors fall back to message-pattern classification
            Error::Other(msg) => message_looks_transient(msg),
        }
    }
}

impl RetryAfter for Error {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Substring fallback for errors that were never typed at the source.
///
/// Mirrors common transient markers: timeouts, connection drops, HTTP 429
/// (too many requests) and 503 (service unavailable).
fn message_looks_transient(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
        || msg.contains("temporar")
        || msg.contains("429")
        || msg.contains("503")
}

/// Failure report from a retry-wrapped operation
///
/// Carries the final error unchanged, annotated with how many attempts were
/// made so callers can record exhaustion without re-counting.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// The last error observed, surfaced unchanged
    pub error: E,
    /// Total attempts made, including the first
    pub attempts: u32,
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_retries` bounds the number of retries after the initial
/// attempt, so the operation runs at most `max_retries + 1` times.
/// Non-retryable errors short-circuit after a single attempt.
///
/// # Returns
///
/// The successful result, or a [`RetryFailure`] holding the last error once
/// attempts are exhausted or a permanent error is hit.
pub async fn execute_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + RetryAfter + std::fmt::Display,
{
    let mut attempt: u32 = 0;
    let mut delay = config.base_delay;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt <= config.max_retries => {
                let jittered = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                // A rate-limit hint mandates a minimum wait; take the larger
                // of the backoff delay and the hint.
                let wait = match e.retry_after() {
                    Some(hint) => jittered.max(hint),
                    None => jittered,
                };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_retries = config.max_retries,
                    delay_ms = wait.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(wait).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed with non-retryable error"
                    );
                }
                return Err(RetryFailure { error: e, attempts: attempt });
            }
        }
    }
}

/// Race a fetch attempt against its per-attempt deadline.
///
/// The timer path is reported as [`Error::Timeout`], which is retryable
/// regardless of how the inner operation would have been classified.
pub async fn with_attempt_timeout<T, Fut>(
    limit: Option<Duration>,
    fut: Fut,
) -> crate::error::Result<T>
where
    Fut: Future<Output = crate::error::Result<T>>,
{
    match limit {
        Some(deadline) => match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                seconds: deadline.as_secs(),
            }),
        },
        None => fut.await,
    }
}

/// Add uniform random jitter in `[0, 1s)` to a delay.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter = JITTER_WINDOW.mul_f64(rng.gen_range(0.0..1.0));
    delay + jitter
}
