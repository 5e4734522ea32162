//! Core download engine split into focused submodules.
//!
//! The `DownloadEngine` struct and its methods are organized by domain:
//! - [`submit`] - URL validation, routing, and queue admission
//! - [`queue_processor`] - FIFO scheduling under the concurrency bound
//! - [`execution`] - Supervised fetch execution (retries, timeouts, cleanup)
//! - [`control`] - Status queries, cancellation, metadata, statistics
//! - [`shutdown`] - Startup and graceful shutdown coordination

mod control;
mod execution;
mod queue_processor;
mod shutdown;
mod submit;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleManager;
use crate::router::Router;
use crate::types::{CorrelationId, Event, ProgressSnapshot, Task};

/// Prefix for isolated scope directory names
const SCOPE_PREFIX: &str = "mdl";

/// Per-task consumer callback for throttled progress updates
pub(crate) type ProgressSink = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Queue and scheduling state (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub(crate) struct QueueState {
    /// FIFO admission queue of pending correlation IDs
    pub(crate) queue: Arc<tokio::sync::Mutex<VecDeque<CorrelationId>>>,
    /// Semaphore bounding concurrent fetches (respects max_concurrent config)
    pub(crate) concurrent_limit: Arc<tokio::sync::Semaphore>,
    /// Map of in-flight tasks to their cancellation tokens
    pub(crate) active: Arc<tokio::sync::Mutex<HashMap<CorrelationId, tokio_util::sync::CancellationToken>>>,
    /// Flag indicating whether new submissions are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<std::sync::atomic::AtomicBool>,
    /// Cancelled once, at shutdown; stops the queue processor and the sweeper
    pub(crate) shutdown: tokio_util::sync::CancellationToken,
}

/// Task registry (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub(crate) struct TaskRegistry {
    /// Live tasks (pending and downloading), keyed by correlation ID
    pub(crate) tasks: Arc<tokio::sync::Mutex<HashMap<CorrelationId, Task>>>,
    /// Bounded history of terminal tasks, oldest first
    pub(crate) recent: Arc<tokio::sync::Mutex<VecDeque<Task>>>,
    /// Per-task progress sinks registered at submission
    pub(crate) sinks: Arc<tokio::sync::Mutex<HashMap<CorrelationId, ProgressSink>>>,
}

/// Concurrent download orchestration engine (cloneable - all fields are Arc-wrapped)
///
/// Supervises the full life of every submitted URL: validation, routing to a
/// [`crate::Backend`], bounded-concurrency scheduling, retry with exponential
/// backoff, throttled progress reporting, and guaranteed cleanup of each
/// task's isolated working directory.
#[derive(Clone)]
pub struct DownloadEngine {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// URL router with the registered backend tiers
    pub(crate) router: Arc<Router>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Isolated working-directory manager
    pub(crate) lifecycle: LifecycleManager,
    /// Task registry
    pub(crate) registry: TaskRegistry,
    /// Queue and scheduling state
    pub(crate) queue_state: QueueState,
    /// Handles of spawned background tasks, joined at shutdown
    pub(crate) handles: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl DownloadEngine {
    /// Create a new engine instance.
    ///
    /// Validates the configuration, ensures the target and temp directories
    /// exist, and sets up the event broadcast channel. The engine is idle
    /// until [`DownloadEngine::start`] is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration and [`Error::Io`]
    /// when a required directory cannot be created.
    pub async fn new(config: Config, router: Router) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.target_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create target directory '{}': {}",
                        config.download.target_dir.display(),
                        e
                    ),
                ))
            })?;
        tokio::fs::create_dir_all(&config.download.temp_root_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create temp directory '{}': {}",
                        config.download.temp_root_dir.display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events allows multiple subscribers to receive all
        // events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let lifecycle = LifecycleManager::new(&config.download.temp_root_dir, SCOPE_PREFIX);

        let queue_state = QueueState {
            queue: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
            concurrent_limit: Arc::new(tokio::sync::Semaphore::new(
                config.download.max_concurrent,
            )),
            active: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            accepting_new: Arc::new(std::sync::atomic::AtomicBool::new(true)),
            shutdown: tokio_util::sync::CancellationToken::new(),
        };

        let registry = TaskRegistry {
            tasks: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
            recent: Arc::new(tokio::sync::Mutex::new(VecDeque::new())),
            sinks: Arc::new(tokio::sync::Mutex::new(HashMap::new())),
        };

        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            event_tx,
            lifecycle,
            registry,
            queue_state,
            handles: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        })
    }

    /// Subscribe to lifecycle events.
    ///
    /// Each receiver gets an independent stream; a slow subscriber can lag
    /// and miss events, but never blocks the engine.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Access the engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Move a task to its terminal resting place.
    ///
    /// Removes it from the live registry and the sink map and appends it to
    /// the bounded recent list, evicting the oldest entry when full.
    pub(crate) async fn retire_task(&self, task: Task) {
        let id = task.correlation_id.clone();
        self.registry.tasks.lock().await.remove(&id);
        self.registry.sinks.lock().await.remove(&id);

        let mut recent = self.registry.recent.lock().await;
        recent.push_back(task);
        while recent.len() > self.config.download.recent_tasks_limit {
            recent.pop_front();
        }
    }
}
