//! Error types for media-dl
//!
//! The taxonomy distinguishes retryable transport failures (network,
//! timeout, rate-limit) from permanent ones (validation, unsupported URL,
//! size limit). The retry engine in [`crate::retry`] is the only place that
//! acts on this distinction.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// The submitted URL is malformed or uses an unsupported scheme
    #[error("invalid URL: {0}")]
    UrlValidation(String),

    /// No registered backend can handle the URL
    #[error("unsupported URL: no backend can handle {0}")]
    UnsupportedUrl(String),

    /// Metadata extraction failed before any transfer started
    #[error("metadata extraction failed for {url}: {reason}")]
    MetadataExtraction {
        /// The URL whose metadata could not be extracted
        url: String,
        /// The reason extraction failed
        reason: String,
        /// Whether the failure was caused by a transient network condition
        transient: bool,
    },

    /// The resource exceeds the configured size limit
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge {
        /// Known or announced size of the resource in bytes
        size: u64,
        /// The configured maximum size in bytes
        limit: u64,
    },

    /// Network-level failure (connection refused/reset, DNS, transport)
    #[error("network error: {0}")]
    Network(String),

    /// An operation exceeded its deadline
    #[error("operation timed out after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded, in whole seconds
        seconds: u64,
    },

    /// The remote side asked us to slow down
    #[error("rate limited by {service}, retry after {retry_after:?}")]
    RateLimit {
        /// Minimum wait mandated by the remote side
        retry_after: Duration,
        /// Label of the service that imposed the limit
        service: String,
    },

    /// Terminal wrapper recorded on a task once retries are exhausted
    #[error("download failed after {attempts} attempt(s): {source}")]
    DownloadFailed {
        /// Total number of attempts made, including the first
        attempts: u32,
        /// The last underlying error, unchanged
        #[source]
        source: Box<Error>,
    },

    /// Cooperative cancellation was observed
    #[error("operation cancelled")]
    Cancelled,

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// No task is registered under the given correlation ID
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Walk the `DownloadFailed` wrapper chain to the innermost error.
    ///
    /// Callers that need the original failure class (e.g. for rendering or
    /// metrics) should use this rather than matching on the wrapper.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::DownloadFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
