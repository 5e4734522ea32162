//! Core types for media-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::utils::random_token;

/// Length of a correlation ID token
const CORRELATION_ID_LEN: usize = 8;

/// Opaque unique identifier for a download task
///
/// Assigned exactly once at submission and never reused within a process
/// lifetime. Used as the join key across the task registry, lifecycle
/// records, and log lines.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh 8-character alphanumeric correlation ID
    pub fn generate() -> Self {
        Self(random_token(CORRELATION_ID_LEN))
    }

    /// Wrap an existing token (used when matching orphaned directories)
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Get the token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status
///
/// Transitions are forward-only: `Pending -> Downloading -> terminal`, with
/// the one shortcut `Pending -> Cancelled` for tasks cancelled while queued.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Queued and waiting for a concurrency slot
    Pending,
    /// Backend fetch in flight
    Downloading,
    /// Successfully completed
    Completed,
    /// Failed with error
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    /// Whether no further transitions are possible from this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        match self {
            TaskStatus::Pending => {
                matches!(next, TaskStatus::Downloading | TaskStatus::Cancelled)
            }
            TaskStatus::Downloading => next.is_terminal(),
            _ => false,
        }
    }
}

/// Immutable per-task configuration, resolved at submission time
///
/// Owned exclusively by the task that carries it. Overrides produce new
/// instances (`with_*` builders) rather than mutating shared state, so a
/// derived configuration never leaks into other tasks.
#[derive(Clone, Debug)]
pub struct DownloadOptions {
    /// Directory the backend writes into; the engine points this at the
    /// task's isolated scope before fetching
    pub target_dir: PathBuf,
    /// Preferred container/format hint (backend-interpreted)
    pub format_hint: Option<String>,
    /// Preferred quality hint (backend-interpreted)
    pub quality_hint: Option<String>,
    /// Hard cap on resource size in bytes
    pub max_file_size: Option<u64>,
    /// Deadline for a single fetch attempt
    pub per_attempt_timeout: Option<Duration>,
    /// Deadline for the whole task across retries
    pub overall_timeout: Option<Duration>,
    /// Deadline for metadata extraction
    pub metadata_timeout: Duration,
    /// Maximum retry attempts after the initial try
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on backoff delay
    pub max_delay: Duration,
}

impl DownloadOptions {
    /// Resolve options from engine configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            target_dir: config.download.target_dir.clone(),
            format_hint: None,
            quality_hint: None,
            max_file_size: config.download.max_file_size,
            per_attempt_timeout: config.timeouts.per_attempt,
            overall_timeout: config.timeouts.overall,
            metadata_timeout: config.timeouts.metadata,
            max_retries: config.retry.max_retries,
            base_delay: config.retry.base_delay,
            max_delay: config.retry.max_delay,
        }
    }

    /// Return a copy with a different target directory
    pub fn with_target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = dir.into();
        self
    }

    /// Return a copy with a format hint
    pub fn with_format_hint(mut self, hint: impl Into<String>) -> Self {
        self.format_hint = Some(hint.into());
        self
    }

    /// Return a copy with a quality hint
    pub fn with_quality_hint(mut self, hint: impl Into<String>) -> Self {
        self.quality_hint = Some(hint.into());
        self
    }

    /// Return a copy with a size cap
    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = Some(limit);
        self
    }

    /// Return a copy with a per-attempt deadline
    pub fn with_per_attempt_timeout(mut self, limit: Duration) -> Self {
        self.per_attempt_timeout = Some(limit);
        self
    }

    /// Return a copy with a whole-task deadline
    pub fn with_overall_timeout(mut self, limit: Duration) -> Self {
        self.overall_timeout = Some(limit);
        self
    }

    /// Return a copy with different retry bounds
    pub fn with_retry_bounds(mut self, max_retries: u32, base: Duration, max: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base;
        self.max_delay = max;
        self
    }
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A single available format advertised by a backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Backend-specific format identifier
    pub id: String,
    /// Container or codec label (e.g. "mp4", "opus")
    pub container: Option<String>,
    /// Resolution label for video formats (e.g. "1080p")
    pub resolution: Option<String>,
    /// Approximate bitrate in bits per second
    pub bitrate: Option<u64>,
}

/// Best-effort resource metadata, obtained without a full transfer
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Resource title, if the backend could determine one
    pub title: Option<String>,
    /// Media duration in seconds
    pub duration_seconds: Option<f64>,
    /// Approximate size in bytes
    pub approx_size: Option<u64>,
    /// Formats the backend can produce for this resource
    pub formats: Vec<FormatDescriptor>,
}

/// Terminal outcome of a successful fetch
#[derive(Clone, Debug, PartialEq)]
pub struct FetchResult {
    /// Where the fetched file landed
    pub file_path: PathBuf,
    /// Total bytes written
    pub bytes_written: u64,
    /// Wall-clock duration of the fetch
    pub elapsed: Duration,
}

/// Lifecycle tag carried on every progress snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    /// Transfer in flight
    Downloading,
    /// Transfer finished successfully
    Completed,
    /// Transfer ended in an error
    Error,
}

impl ProgressStatus {
    /// Terminal snapshots bypass throttling and are always forwarded
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStatus::Completed | ProgressStatus::Error)
    }
}

/// A point-in-time observation of fetch progress
///
/// Ephemeral: each snapshot supersedes the previous one, and only the latest
/// is retained per task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Percent complete in [0, 100], or None when the total is unknown
    pub percent: Option<f32>,
    /// Bytes downloaded so far
    pub downloaded_bytes: u64,
    /// Total bytes, or None when unknown
    pub total_bytes: Option<u64>,
    /// Instantaneous speed in bytes per second
    pub speed_bps: Option<f64>,
    /// Estimated seconds remaining
    pub eta_seconds: Option<u64>,
    /// Lifecycle tag
    pub status: ProgressStatus,
}

impl ProgressSnapshot {
    /// Build an in-flight snapshot, deriving percent/ETA from the byte counts
    pub fn downloading(downloaded_bytes: u64, total_bytes: Option<u64>, speed_bps: f64) -> Self {
        let percent = total_bytes
            .filter(|total| *total > 0)
            .map(|total| (downloaded_bytes as f32 / total as f32) * 100.0);
        let eta_seconds = match (total_bytes, speed_bps > 0.0) {
            (Some(total), true) if total > downloaded_bytes => {
                Some(((total - downloaded_bytes) as f64 / speed_bps) as u64)
            }
            _ => None,
        };
        Self {
            percent,
            downloaded_bytes,
            total_bytes,
            speed_bps: Some(speed_bps),
            eta_seconds,
            status: ProgressStatus::Downloading,
        }
    }

    /// Build a terminal completed snapshot
    pub fn completed(downloaded_bytes: u64) -> Self {
        Self {
            percent: Some(100.0),
            downloaded_bytes,
            total_bytes: Some(downloaded_bytes),
            speed_bps: None,
            eta_seconds: Some(0),
            status: ProgressStatus::Completed,
        }
    }

    /// Build a terminal error snapshot
    pub fn errored(downloaded_bytes: u64) -> Self {
        Self {
            percent: None,
            downloaded_bytes,
            total_bytes: None,
            speed_bps: None,
            eta_seconds: None,
            status: ProgressStatus::Error,
        }
    }
}

/// One request to fetch a URL
///
/// Created at submission in `Pending`, mutated only by the engine's worker
/// loop and progress pump, and moved to the bounded recent list once
/// terminal.
#[derive(Clone, Debug)]
pub struct Task {
    /// Unique correlation ID, assigned at submission
    pub correlation_id: CorrelationId,
    /// The submitted URL
    pub url: String,
    /// Resolved immutable options
    pub options: DownloadOptions,
    /// Current state-machine position
    pub status: TaskStatus,
    /// Name of the backend the router selected
    pub backend_name: String,
    /// Submission timestamp
    pub created_at: DateTime<Utc>,
    /// Latest progress snapshot, if any raw event arrived yet
    pub progress: Option<ProgressSnapshot>,
    /// Terminal outcome, set on success
    pub result: Option<FetchResult>,
    /// Final error message, set on failure
    pub error: Option<String>,
    /// The task's isolated working directory, set once the scope opens
    pub temp_dir: Option<PathBuf>,
}

impl Task {
    /// Create a new pending task
    pub fn new(
        correlation_id: CorrelationId,
        url: impl Into<String>,
        options: DownloadOptions,
        backend_name: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id,
            url: url.into(),
            options,
            status: TaskStatus::Pending,
            backend_name: backend_name.into(),
            created_at: Utc::now(),
            progress: None,
            result: None,
            error: None,
            temp_dir: None,
        }
    }

    /// Apply a status transition if the state machine permits it.
    ///
    /// Illegal moves (terminal states, backwards steps) leave the task
    /// untouched and return `false`. All engine-side status mutations go
    /// through here.
    pub fn advance(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                from = ?self.status,
                to = ?next,
                "Ignoring illegal status transition"
            );
            false
        }
    }
}

/// Point-in-time scheduling statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Tasks currently in `Downloading`
    pub active_count: usize,
    /// Tasks waiting in the FIFO queue
    pub pending_count: usize,
    /// Configured concurrency bound
    pub max_concurrent: usize,
    /// Free semaphore slots
    pub available_slots: usize,
}

/// Event emitted during task lifecycle
///
/// Consumers subscribe via [`crate::DownloadEngine::subscribe`]; no polling
/// required.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task accepted and queued
    Queued {
        /// Correlation ID
        id: CorrelationId,
        /// Submitted URL
        url: String,
        /// Backend the router selected
        backend: String,
    },

    /// Task admitted for execution
    Started {
        /// Correlation ID
        id: CorrelationId,
    },

    /// Throttled progress update
    Progress {
        /// Correlation ID
        id: CorrelationId,
        /// The forwarded snapshot
        snapshot: ProgressSnapshot,
    },

    /// Task completed successfully
    Completed {
        /// Correlation ID
        id: CorrelationId,
        /// Total bytes written
        bytes_written: u64,
    },

    /// Task failed terminally
    Failed {
        /// Correlation ID
        id: CorrelationId,
        /// Final error message
        error: String,
    },

    /// Task cancelled
    Cancelled {
        /// Correlation ID
        id: CorrelationId,
    },

    /// Engine shut down
    Shutdown,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_ids_are_eight_chars() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn correlation_ids_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            assert!(seen.insert(CorrelationId::generate()), "duplicate ID");
        }
    }

    #[test]
    fn status_terminal_classification() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Downloading.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_transitions_are_forward_only() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Downloading));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));

        assert!(TaskStatus::Downloading.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Downloading.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Downloading.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Downloading.can_transition_to(TaskStatus::Pending));

        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            for next in [
                TaskStatus::Pending,
                TaskStatus::Downloading,
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal:?} must not transition to {next:?}"
                );
            }
        }
    }

    #[test]
    fn advance_applies_only_legal_transitions() {
        let mut task = Task::new(
            CorrelationId::generate(),
            "https://example.com/a.mp4",
            DownloadOptions::default(),
            "direct_file",
        );

        assert!(!task.advance(TaskStatus::Completed));
        assert_eq!(task.status, TaskStatus::Pending);

        assert!(task.advance(TaskStatus::Downloading));
        assert!(task.advance(TaskStatus::Cancelled));

        // Terminal: every further move is rejected
        assert!(!task.advance(TaskStatus::Downloading));
        assert!(!task.advance(TaskStatus::Completed));
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    #[test]
    fn options_overrides_do_not_mutate_original() {
        let base = DownloadOptions::default();
        let derived = base.clone().with_max_file_size(1024);

        assert_eq!(derived.max_file_size, Some(1024));
        assert_eq!(base.max_file_size, None, "base options must stay unchanged");
    }

    #[test]
    fn snapshot_derives_percent_and_eta() {
        let snap = ProgressSnapshot::downloading(50, Some(200), 25.0);
        assert_eq!(snap.percent, Some(25.0));
        assert_eq!(snap.eta_seconds, Some(6));
        assert_eq!(snap.status, ProgressStatus::Downloading);
    }

    #[test]
    fn snapshot_with_unknown_total_has_no_percent() {
        let snap = ProgressSnapshot::downloading(1024, None, 100.0);
        assert_eq!(snap.percent, None);
        assert_eq!(snap.eta_seconds, None);
    }

    #[test]
    fn terminal_snapshots_are_terminal() {
        assert!(ProgressSnapshot::completed(10).status.is_terminal());
        assert!(ProgressSnapshot::errored(10).status.is_terminal());
        assert!(
            !ProgressSnapshot::downloading(1, None, 1.0)
                .status
                .is_terminal()
        );
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let event = Event::Completed {
            id: CorrelationId::new("a1b2c3d4"),
            bytes_written: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["id"], "a1b2c3d4");
        assert_eq!(json["bytes_written"], 42);
    }

    #[test]
    fn snapshot_serializes_per_schema() {
        let snap = ProgressSnapshot::downloading(100, Some(400), 50.0);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["percent"], 25.0);
        assert_eq!(json["downloaded_bytes"], 100);
        assert_eq!(json["total_bytes"], 400);
        assert_eq!(json["status"], "downloading");
    }
}
