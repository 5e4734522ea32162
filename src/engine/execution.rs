//! Supervised fetch execution.
//!
//! `run_task` owns a task from admission to its terminal state: it opens the
//! isolated scope, points the backend at it, wraps the fetch in retry and
//! timeout layers, pumps raw progress through the throttle, and closes the
//! scope on every exit path before retiring the task.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::lifecycle::ScopeOutcome;
use crate::progress::ProgressReporter;
use crate::retry::{execute_with_retry, with_attempt_timeout};
use crate::router::Router;
use crate::types::{
    CorrelationId, DownloadOptions, Event, FetchResult, ProgressSnapshot, TaskStatus,
};

use super::DownloadEngine;

/// Capacity of the raw progress channel between backend and pump
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

/// How a supervised fetch ended
enum FetchOutcome {
    Completed(FetchResult),
    Failed(Error),
    Cancelled,
}

impl DownloadEngine {
    /// Execute one admitted task to completion.
    ///
    /// Called by the queue processor with the semaphore permit already held
    /// by the spawning task.
    pub(crate) async fn run_task(&self, id: CorrelationId, cancel: CancellationToken) {
        let snapshot = {
            let mut tasks = self.registry.tasks.lock().await;
            tasks.get_mut(&id).and_then(|task| {
                task.advance(TaskStatus::Downloading)
                    .then(|| (task.url.clone(), task.options.clone()))
            })
        };
        let Some((url, options)) = snapshot else {
            // Cancelled and retired between dequeue and spawn
            self.queue_state.active.lock().await.remove(&id);
            return;
        };

        tracing::info!(correlation_id = %id, url = %url, "Download started");
        let _ = self.event_tx.send(Event::Started { id: id.clone() });

        let outcome = self.execute_fetch(&id, &url, options, cancel).await;

        self.queue_state.active.lock().await.remove(&id);

        let finished = {
            let mut tasks = self.registry.tasks.lock().await;
            tasks.get_mut(&id).map(|task| {
                match &outcome {
                    FetchOutcome::Completed(result) => {
                        if task.advance(TaskStatus::Completed) {
                            task.result = Some(result.clone());
                        }
                    }
                    FetchOutcome::Failed(error) => {
                        if task.advance(TaskStatus::Failed) {
                            task.error = Some(error.to_string());
                        }
                    }
                    FetchOutcome::Cancelled => {
                        task.advance(TaskStatus::Cancelled);
                    }
                }
                task.clone()
            })
        };
        if let Some(task) = finished {
            self.retire_task(task).await;
        }

        match outcome {
            FetchOutcome::Completed(result) => {
                tracing::info!(
                    correlation_id = %id,
                    bytes = result.bytes_written,
                    path = %result.file_path.display(),
                    "Download completed"
                );
                let _ = self.event_tx.send(Event::Completed {
                    id: id.clone(),
                    bytes_written: result.bytes_written,
                });
            }
            FetchOutcome::Failed(error) => {
                tracing::error!(correlation_id = %id, error = %error, "Download failed");
                let _ = self.event_tx.send(Event::Failed {
                    id: id.clone(),
                    error: error.to_string(),
                });
            }
            FetchOutcome::Cancelled => {
                tracing::info!(correlation_id = %id, "Download cancelled");
                let _ = self.event_tx.send(Event::Cancelled { id: id.clone() });
            }
        }
    }

    /// Run the fetch inside its isolated scope.
    ///
    /// The scope is closed with an outcome matching the fetch result on
    /// every path out of this function; an unwinding panic in the backend is
    /// covered by the guard's `Drop`.
    async fn execute_fetch(
        &self,
        id: &CorrelationId,
        url: &str,
        options: DownloadOptions,
        cancel: CancellationToken,
    ) -> FetchOutcome {
        // Re-route for the backend instance; the submit-time decision is not
        // stored because decisions are cheap to recompute.
        let parsed = match Router::parse_url(url) {
            Ok(parsed) => parsed,
            Err(e) => return FetchOutcome::Failed(e),
        };
        let backend = match self.router.route_url(&parsed) {
            Ok(decision) => decision.backend,
            Err(e) => return FetchOutcome::Failed(e),
        };

        let scope = match self.lifecycle.open(id).await {
            Ok(scope) => scope,
            Err(e) => return FetchOutcome::Failed(e),
        };
        {
            let mut tasks = self.registry.tasks.lock().await;
            if let Some(task) = tasks.get_mut(id) {
                task.temp_dir = Some(scope.path().to_path_buf());
            }
        }

        // The backend writes into the isolated scope; the caller-visible
        // destination only receives the finished file.
        let final_dir = options.target_dir.clone();
        let fetch_options = options.clone().with_target_dir(scope.path());

        let (raw_tx, raw_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let pump = self.spawn_progress_pump(id.clone(), raw_rx).await;

        let retry_config = RetryConfig {
            max_retries: options.max_retries,
            base_delay: options.base_delay,
            max_delay: options.max_delay,
            backoff_multiplier: self.config.retry.backoff_multiplier,
            jitter: self.config.retry.jitter,
        };

        let attempt_cancel = cancel.clone();
        let retry_flow = execute_with_retry(&retry_config, || {
            let backend = Arc::clone(&backend);
            let parsed = parsed.clone();
            let fetch_options = fetch_options.clone();
            let raw_tx = raw_tx.clone();
            let cancel = attempt_cancel.clone();
            async move {
                with_attempt_timeout(
                    fetch_options.per_attempt_timeout,
                    backend.fetch(&parsed, &fetch_options, raw_tx, cancel),
                )
                .await
            }
        });
        let bounded_flow = async {
            match options.overall_timeout {
                Some(limit) => match tokio::time::timeout(limit, retry_flow).await {
                    Ok(result) => result,
                    Err(_) => Err(crate::retry::RetryFailure {
                        error: Error::Timeout {
                            seconds: limit.as_secs(),
                        },
                        attempts: 1,
                    }),
                },
                None => retry_flow.await,
            }
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => FetchOutcome::Cancelled,
            result = bounded_flow => match result {
                Ok(fetch) => match promote_result(fetch, &final_dir).await {
                    Ok(fetch) => FetchOutcome::Completed(fetch),
                    Err(e) => FetchOutcome::Failed(e),
                },
                Err(failure) => {
                    if matches!(failure.error, Error::Cancelled) {
                        FetchOutcome::Cancelled
                    } else if failure.attempts > 1 {
                        FetchOutcome::Failed(Error::DownloadFailed {
                            attempts: failure.attempts,
                            source: Box::new(failure.error),
                        })
                    } else {
                        FetchOutcome::Failed(failure.error)
                    }
                }
            },
        };

        // Terminal snapshot, then close the channel so the pump drains and
        // exits before the task is retired.
        let terminal = match &outcome {
            FetchOutcome::Completed(result) => {
                Some(ProgressSnapshot::completed(result.bytes_written))
            }
            FetchOutcome::Failed(_) => Some(ProgressSnapshot::errored(
                self.latest_downloaded_bytes(id).await,
            )),
            FetchOutcome::Cancelled => None,
        };
        if let Some(snapshot) = terminal {
            let _ = raw_tx.send(snapshot).await;
        }
        drop(raw_tx);
        let _ = pump.await;

        let scope_outcome = match &outcome {
            FetchOutcome::Completed(_) => ScopeOutcome::Completed,
            FetchOutcome::Failed(_) => ScopeOutcome::Failed,
            FetchOutcome::Cancelled => ScopeOutcome::Cancelled,
        };
        scope.close(scope_outcome).await;

        outcome
    }

    /// Spawn the per-task progress pump.
    ///
    /// Reads raw snapshots from the backend, keeps the latest one on the
    /// task record, and forwards through the throttle to the broadcast
    /// channel and the task's sink (if registered).
    async fn spawn_progress_pump(
        &self,
        id: CorrelationId,
        mut raw_rx: mpsc::Receiver<ProgressSnapshot>,
    ) -> tokio::task::JoinHandle<()> {
        let tasks = self.registry.tasks.clone();
        let event_tx = self.event_tx.clone();
        let sink = self.registry.sinks.lock().await.get(&id).cloned();
        let mut reporter = ProgressReporter::new(&self.config.progress);

        tokio::spawn(async move {
            while let Some(snapshot) = raw_rx.recv().await {
                {
                    let mut tasks_guard = tasks.lock().await;
                    if let Some(task) = tasks_guard.get_mut(&id) {
                        task.progress = Some(snapshot.clone());
                    }
                }
                if reporter.should_forward(&snapshot) {
                    let _ = event_tx.send(Event::Progress {
                        id: id.clone(),
                        snapshot: snapshot.clone(),
                    });
                    if let Some(sink) = &sink {
                        sink(snapshot);
                    }
                }
            }
            let summary = reporter.summary();
            tracing::debug!(
                correlation_id = %id,
                total_bytes = summary.total_bytes,
                average_speed_bps = summary.average_speed_bps,
                "Progress stream closed"
            );
        })
    }

    async fn latest_downloaded_bytes(&self, id: &CorrelationId) -> u64 {
        let tasks = self.registry.tasks.lock().await;
        tasks
            .get(id)
            .and_then(|t| t.progress.as_ref())
            .map(|p| p.downloaded_bytes)
            .unwrap_or(0)
    }
}

/// Move the finished file out of the isolated scope into its destination.
///
/// Tries a rename first; falls back to copy-and-remove when the scope and
/// the destination sit on different filesystems.
async fn promote_result(mut fetch: FetchResult, final_dir: &Path) -> Result<FetchResult> {
    tokio::fs::create_dir_all(final_dir).await?;
    let name = fetch.file_path.file_name().ok_or_else(|| {
        Error::Other(format!(
            "fetch produced a path without a file name: {}",
            fetch.file_path.display()
        ))
    })?;
    let dest = final_dir.join(name);

    match tokio::fs::rename(&fetch.file_path, &dest).await {
        Ok(()) => {}
        Err(_) => {
            tokio::fs::copy(&fetch.file_path, &dest).await?;
            tokio::fs::remove_file(&fetch.file_path).await?;
        }
    }

    fetch.file_path = dest;
    Ok(fetch)
}
