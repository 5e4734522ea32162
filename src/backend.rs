//! The fetch backend contract
//!
//! A [`Backend`] is a pluggable implementation of the fetch capability for
//! some class of URLs. The engine never talks to the network itself; it
//! routes every task to a backend and supervises the call (retries,
//! timeouts, cancellation, progress plumbing, scope cleanup).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Result;
use crate::types::{DownloadOptions, FetchResult, Metadata, ProgressSnapshot};

/// Capability contract every fetch implementation must satisfy
///
/// Implementations must be stateless with respect to individual fetches:
/// a single instance is cached by the router and shared across concurrent
/// tasks.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short stable name used in route decisions, task records, and logs
    fn name(&self) -> &str;

    /// Cheap, side-effect-free classification of a URL.
    ///
    /// Must not perform network I/O beyond what is necessary to
    /// pattern-match the URL.
    fn can_handle(&self, url: &Url) -> bool;

    /// Extract best-effort metadata without downloading the full resource.
    ///
    /// The engine wraps this call in the configured metadata deadline;
    /// implementations should still honor `options.metadata_timeout` for
    /// their own internal requests where applicable.
    async fn extract_metadata(&self, url: &Url, options: &DownloadOptions) -> Result<Metadata>;

    /// Perform the transfer into `options.target_dir`.
    ///
    /// Contract:
    /// - writes files only under `options.target_dir`;
    /// - sends raw [`ProgressSnapshot`]s on `progress` at its own
    ///   granularity (throttling is the engine's job, not the backend's);
    /// - observes `cancel` at I/O checkpoints and returns
    ///   [`crate::Error::Cancelled`] once it fires;
    /// - enforces `options.max_file_size`, failing fast with
    ///   [`crate::Error::FileTooLarge`] when the size is known in advance;
    /// - reports failures as typed [`crate::Error`] variants so the retry
    ///   layer can classify them.
    async fn fetch(
        &self,
        url: &Url,
        options: &DownloadOptions,
        progress: mpsc::Sender<ProgressSnapshot>,
        cancel: CancellationToken,
    ) -> Result<FetchResult>;
}
