//! Status queries, cancellation, metadata, statistics.

use crate::error::{Error, Result};
use crate::retry::with_attempt_timeout;
use crate::router::Router;
use crate::types::{CorrelationId, EngineStats, Event, Metadata, Task, TaskStatus};

use super::DownloadEngine;

impl DownloadEngine {
    /// Cancel a task.
    ///
    /// Behavior depends on where the task currently is:
    /// - Pending: removed from the queue and marked `Cancelled` immediately,
    ///   with zero backend involvement. Returns `true`.
    /// - Downloading: the task's cancellation token fires; the supervised
    ///   fetch observes it, cleans up its scope, and records the terminal
    ///   state. Returns `true`.
    /// - Already terminal, or unknown to this engine: no-op. Returns `false`.
    ///
    /// Cancellation is idempotent: repeat calls on a finished task return
    /// `false` rather than erroring, and so does an ID that was never issued
    /// or whose record has aged out of the recent list. Use
    /// [`DownloadEngine::get_task`] to distinguish unknown from terminal.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` return leaves room for cancel
    /// steps that can fail.
    pub async fn cancel(&self, id: &CorrelationId) -> Result<bool> {
        let status = {
            let tasks = self.registry.tasks.lock().await;
            tasks.get(id).map(|t| t.status)
        };

        match status {
            Some(TaskStatus::Pending) => {
                {
                    let mut queue = self.queue_state.queue.lock().await;
                    queue.retain(|queued| queued != id);
                }
                let cancelled = {
                    let mut tasks = self.registry.tasks.lock().await;
                    tasks.get_mut(id).and_then(|task| {
                        task.advance(TaskStatus::Cancelled).then(|| task.clone())
                    })
                };
                if let Some(task) = cancelled {
                    self.retire_task(task).await;
                }
                tracing::info!(correlation_id = %id, "Cancelled queued download");
                let _ = self.event_tx.send(Event::Cancelled { id: id.clone() });
                Ok(true)
            }
            Some(TaskStatus::Downloading) => {
                let active = self.queue_state.active.lock().await;
                if let Some(token) = active.get(id) {
                    token.cancel();
                    tracing::info!(correlation_id = %id, "Signalled cancellation to active download");
                }
                // The terminal transition, event, and cleanup all happen in
                // the supervised fetch as it unwinds.
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                // Terminal (in the recent list), aged out, or never issued:
                // nothing to cancel either way.
                tracing::debug!(correlation_id = %id, "Cancel requested for unknown or finished task");
                Ok(false)
            }
        }
    }

    /// Look up a task by correlation ID.
    ///
    /// Covers both live tasks and the bounded recent history.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskNotFound`] when no record exists.
    pub async fn get_task(&self, id: &CorrelationId) -> Result<Task> {
        {
            let tasks = self.registry.tasks.lock().await;
            if let Some(task) = tasks.get(id) {
                return Ok(task.clone());
            }
        }
        let recent = self.registry.recent.lock().await;
        recent
            .iter()
            .find(|t| &t.correlation_id == id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Current status of a task
    pub async fn status(&self, id: &CorrelationId) -> Result<TaskStatus> {
        Ok(self.get_task(id).await?.status)
    }

    /// All live tasks (pending and downloading), oldest first
    pub async fn list_active(&self) -> Vec<Task> {
        let tasks = self.registry.tasks.lock().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by_key(|t| t.created_at);
        list
    }

    /// Recently finished tasks, oldest first, bounded by `recent_tasks_limit`
    pub async fn list_recent(&self) -> Vec<Task> {
        let recent = self.registry.recent.lock().await;
        recent.iter().cloned().collect()
    }

    /// Point-in-time scheduling statistics
    pub async fn stats(&self) -> EngineStats {
        // Pending is counted from the registry, not the queue: a task the
        // processor has popped but is still holding at the semaphore remains
        // pending from the caller's point of view.
        let pending_count = {
            let tasks = self.registry.tasks.lock().await;
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .count()
        };
        let active_count = self.queue_state.active.lock().await.len();
        EngineStats {
            active_count,
            pending_count,
            max_concurrent: self.config.download.max_concurrent,
            available_slots: self.queue_state.concurrent_limit.available_permits(),
        }
    }

    /// Extract metadata for a URL without queueing a download.
    ///
    /// Routes the URL like a submission would and asks the selected backend,
    /// bounded by the configured metadata deadline.
    pub async fn metadata(&self, url: &str) -> Result<Metadata> {
        let parsed = Router::parse_url(url)?;
        let decision = self.router.route_url(&parsed)?;
        let options = crate::types::DownloadOptions::from_config(&self.config);
        with_attempt_timeout(
            Some(options.metadata_timeout),
            decision.backend.extract_metadata(&parsed, &options),
        )
        .await
    }
}
