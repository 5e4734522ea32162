//! Startup and graceful shutdown coordination.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::error::Result;
use crate::types::{Event, Task, TaskStatus};

use super::DownloadEngine;

/// How long shutdown waits for in-flight downloads to unwind
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl DownloadEngine {
    /// Start the engine's background tasks.
    ///
    /// Spawns the queue processor and, when enabled, the periodic orphan
    /// sweeper. Idempotent: calling `start` on a running engine is a no-op.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return;
        }

        handles.push(self.start_queue_processor());
        if self.config.sweep.enabled {
            handles.push(self.lifecycle.spawn_orphan_sweeper(
                self.config.sweep.sweep_interval,
                self.config.sweep.orphan_sweep_age,
                self.queue_state.shutdown.child_token(),
            ));
        }
        tracing::info!(
            max_concurrent = self.config.download.max_concurrent,
            sweeper = self.config.sweep.enabled,
            "Download engine started"
        );
    }

    /// Gracefully shut down the engine.
    ///
    /// Performs the shutdown sequence:
    /// 1. Stops accepting new submissions
    /// 2. Stops the queue processor and the sweeper, joining their handles,
    ///    so nothing further is admitted
    /// 3. Cancels every still-pending task (marked `Cancelled` without
    ///    running)
    /// 4. Cancels all in-flight downloads via their cancellation tokens
    /// 5. Waits for in-flight downloads to unwind, with a timeout
    /// 6. Emits [`Event::Shutdown`]
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` return leaves room for shutdown
    /// steps that can fail.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new submissions
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);
        tracing::info!("Stopped accepting new downloads");

        // 2. Stop admission before touching pending tasks: the processor
        // re-queues any task it holds at the semaphore before exiting, so
        // after the join every unstarted task is back in the queue.
        self.queue_state.shutdown.cancel();
        let handles: Vec<_> = {
            let mut handles = self.handles.lock().await;
            handles.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }

        // 3. Cancel tasks that never started
        let drained: Vec<_> = {
            let mut queue = self.queue_state.queue.lock().await;
            queue.drain(..).collect()
        };
        for id in drained {
            let cancelled: Option<Task> = {
                let mut tasks = self.registry.tasks.lock().await;
                tasks.get_mut(&id).and_then(|task| {
                    task.advance(TaskStatus::Cancelled).then(|| task.clone())
                })
            };
            if let Some(task) = cancelled {
                self.retire_task(task).await;
                let _ = self.event_tx.send(Event::Cancelled { id });
            }
        }

        // 4. Cancel all in-flight downloads
        {
            let active = self.queue_state.active.lock().await;
            tracing::debug!(active_count = active.len(), "Cancelling active downloads");
            for (id, token) in active.iter() {
                tracing::debug!(correlation_id = %id, "Signalling cancellation");
                token.cancel();
            }
        }

        // 5. Wait for in-flight downloads to unwind, with a timeout
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.wait_for_active()).await {
            Ok(()) => tracing::info!("All active downloads unwound"),
            Err(_) => tracing::warn!(
                "Timeout waiting for active downloads, proceeding with shutdown"
            ),
        }

        // 6. Emit shutdown event
        let _ = self.event_tx.send(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait until no downloads remain in the active map
    async fn wait_for_active(&self) {
        loop {
            let active_count = {
                let active = self.queue_state.active.lock().await;
                active.len()
            };
            if active_count == 0 {
                return;
            }
            tracing::debug!(active_count, "Waiting for active downloads to unwind");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
