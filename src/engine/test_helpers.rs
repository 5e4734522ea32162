//! Shared helpers for engine tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backend::Backend;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::router::Router;
use crate::types::{
    CorrelationId, DownloadOptions, FetchResult, Metadata, ProgressSnapshot, TaskStatus,
};

use super::DownloadEngine;

/// What the mock backend does when `fetch` is called
pub(crate) enum MockBehavior {
    /// Write `bytes` into the target dir after `delay`, emitting progress
    Succeed { bytes: u64, delay: Duration },
    /// Fail with transient network errors for the first `failures` calls,
    /// then succeed
    FlakyThenSucceed { failures: u32, bytes: u64 },
    /// Always fail with the given error
    AlwaysFail(fn() -> Error),
    /// Park until the cancellation token fires
    HangUntilCancelled,
    /// Panic mid-fetch
    Panic,
}

/// Scripted backend for exercising the engine without a network
pub(crate) struct MockBackend {
    behavior: MockBehavior,
    /// Total fetch calls across all tasks and attempts
    pub(crate) calls: AtomicU32,
    in_flight: AtomicUsize,
    /// High-water mark of simultaneous fetches
    pub(crate) max_in_flight: AtomicUsize,
}

impl MockBackend {
    pub(crate) fn arc(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub(crate) fn succeeding() -> Arc<Self> {
        Self::arc(MockBehavior::Succeed {
            bytes: 1024,
            delay: Duration::from_millis(20),
        })
    }
}

struct InFlightGuard<'a>(&'a MockBackend);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn can_handle(&self, _url: &Url) -> bool {
        true
    }

    async fn extract_metadata(&self, _url: &Url, _options: &DownloadOptions) -> Result<Metadata> {
        Ok(Metadata {
            title: Some("mock resource".to_string()),
            ..Metadata::default()
        })
    }

    async fn fetch(
        &self,
        _url: &Url,
        options: &DownloadOptions,
        progress: mpsc::Sender<ProgressSnapshot>,
        cancel: CancellationToken,
    ) -> Result<FetchResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self);

        match &self.behavior {
            MockBehavior::Succeed { bytes, delay } => {
                let _ = progress
                    .send(ProgressSnapshot::downloading(*bytes / 2, Some(*bytes), 1.0))
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(*delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
                write_output(options, *bytes).await
            }
            MockBehavior::FlakyThenSucceed { failures, bytes } => {
                if call <= *failures {
                    Err(Error::Network(format!("simulated failure on call {call}")))
                } else {
                    write_output(options, *bytes).await
                }
            }
            MockBehavior::AlwaysFail(make_error) => Err(make_error()),
            MockBehavior::HangUntilCancelled => {
                cancel.cancelled().await;
                Err(Error::Cancelled)
            }
            MockBehavior::Panic => panic!("mock backend panicked"),
        }
    }
}

async fn write_output(options: &DownloadOptions, bytes: u64) -> Result<FetchResult> {
    let path = options.target_dir.join("out.bin");
    tokio::fs::write(&path, vec![0u8; bytes as usize]).await?;
    Ok(FetchResult {
        file_path: path,
        bytes_written: bytes,
        elapsed: Duration::from_millis(1),
    })
}

/// Fast-retry configuration rooted in a temp directory
pub(crate) fn test_config(dir: &tempfile::TempDir, max_concurrent: usize) -> Config {
    let mut config = Config::default();
    config.download.target_dir = dir.path().join("downloads");
    config.download.temp_root_dir = dir.path().join("temp");
    config.download.max_concurrent = max_concurrent;
    config.retry.base_delay = Duration::from_millis(20);
    config.retry.max_delay = Duration::from_millis(100);
    config.retry.jitter = false;
    config.progress.min_interval = Duration::from_millis(10);
    config.sweep.enabled = false;
    config
}

/// Build and start an engine over a single mock backend.
///
/// The returned `TempDir` must be kept alive for the engine's lifetime.
pub(crate) async fn create_test_engine(
    max_concurrent: usize,
    backend: Arc<MockBackend>,
) -> (DownloadEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir, max_concurrent);
    let mut router = Router::new();
    router.register_platform(backend);
    let engine = DownloadEngine::new(config, router).await.unwrap();
    engine.start().await;
    (engine, dir)
}

/// Poll until the task reaches `expected`, panicking after `timeout`
pub(crate) async fn wait_for_status(
    engine: &DownloadEngine,
    id: &CorrelationId,
    expected: TaskStatus,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = engine.status(id).await.unwrap();
        if status == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} stuck in {status:?}, expected {expected:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until every listed task is terminal
pub(crate) async fn wait_until_all_terminal(
    engine: &DownloadEngine,
    ids: &[CorrelationId],
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut all_terminal = true;
        for id in ids {
            if !engine.status(id).await.unwrap().is_terminal() {
                all_terminal = false;
                break;
            }
        }
        if all_terminal {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "tasks did not all reach a terminal state in {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
