//! Queue processor — admits pending tasks under the concurrency bound.

use std::time::Duration;

use crate::types::TaskStatus;

use super::DownloadEngine;

/// Interval between queue polling attempts when the queue is empty
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl DownloadEngine {
    /// Start the queue processor task.
    ///
    /// Spawns a background task that continuously:
    /// 1. Pops the oldest pending task off the FIFO queue
    /// 2. Acquires a permit from the concurrency limiter (blocks at the
    ///    `max_concurrent` bound)
    /// 3. Spawns the supervised fetch for that task
    /// 4. Repeats until shutdown
    ///
    /// Slots freed by completion, failure, or cancellation are handed to the
    /// next queued task automatically via the semaphore permit held by each
    /// spawned fetch.
    pub(crate) fn start_queue_processor(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.queue_state.queue.clone();
        let concurrent_limit = self.queue_state.concurrent_limit.clone();
        let active = self.queue_state.active.clone();
        let shutdown = self.queue_state.shutdown.clone();
        let engine = self.clone();

        tokio::spawn(async move {
            loop {
                let next = {
                    let mut queue_guard = queue.lock().await;
                    queue_guard.pop_front()
                };

                if let Some(id) = next {
                    // Acquire a permit, but stay responsive to shutdown; a
                    // task popped during shutdown goes back to the front so
                    // it is not silently lost.
                    let permit = tokio::select! {
                        permit = concurrent_limit.clone().acquire_owned() => match permit {
                            Ok(p) => p,
                            Err(_) => {
                                queue.lock().await.push_front(id);
                                break;
                            }
                        },
                        _ = shutdown.cancelled() => {
                            queue.lock().await.push_front(id);
                            break;
                        }
                    };

                    // The task may have been cancelled while queued or while
                    // waiting for the permit; only still-pending tasks run.
                    let still_pending = {
                        let tasks = engine.registry.tasks.lock().await;
                        tasks
                            .get(&id)
                            .map(|t| t.status == TaskStatus::Pending)
                            .unwrap_or(false)
                    };
                    if !still_pending {
                        tracing::debug!(
                            correlation_id = %id,
                            "Skipping dequeued task no longer pending"
                        );
                        continue;
                    }

                    let cancel_token = tokio_util::sync::CancellationToken::new();
                    {
                        let mut active_guard = active.lock().await;
                        active_guard.insert(id.clone(), cancel_token.clone());
                    }

                    let engine = engine.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        engine.run_task(id, cancel_token).await;
                    });
                } else {
                    // Queue is empty, wait a bit before checking again
                    tokio::select! {
                        _ = tokio::time::sleep(QUEUE_POLL_INTERVAL) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
            }
            tracing::debug!("Queue processor stopped");
        })
    }
}
