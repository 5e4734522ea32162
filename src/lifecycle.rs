//! Isolated per-task working directories
//!
//! Every admitted task gets its own uniquely-named directory under the
//! configured temp root. The directory is removed on every exit path:
//! [`ScopeGuard::close`] handles the normal outcomes, and the guard's `Drop`
//! covers panics and early returns, so a failed fetch can never leak state
//! into another task. A periodic sweeper removes directories orphaned by
//! process crashes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::CorrelationId;
use crate::utils::random_token;

/// Length of the random suffix appended to scope directory names
const SCOPE_SUFFIX_LEN: usize = 6;

/// State of one isolated working directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeState {
    /// Record created, directory not yet on disk
    Created,
    /// Directory exists and a task may be writing into it
    Active,
    /// Task finished successfully
    Completed,
    /// Task failed
    Failed,
    /// Task was cancelled
    Cancelled,
    /// Directory removed from disk
    Cleaned,
}

/// Terminal outcome reported when closing a scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeOutcome {
    /// The wrapped operation succeeded
    Completed,
    /// The wrapped operation failed
    Failed,
    /// The wrapped operation was cancelled
    Cancelled,
}

impl ScopeOutcome {
    fn state(self) -> ScopeState {
        match self {
            ScopeOutcome::Completed => ScopeState::Completed,
            ScopeOutcome::Failed => ScopeState::Failed,
            ScopeOutcome::Cancelled => ScopeState::Cancelled,
        }
    }
}

/// Tracks one isolated working directory for observability
#[derive(Clone, Debug)]
pub struct LifecycleRecord {
    /// Owning correlation ID
    pub correlation_id: CorrelationId,
    /// Absolute path of the isolated directory
    pub path: PathBuf,
    /// Current state
    pub state: ScopeState,
    /// Timestamped transition history for debugging
    pub transitions: Vec<(DateTime<Utc>, ScopeState)>,
}

impl LifecycleRecord {
    fn new(correlation_id: CorrelationId, path: PathBuf) -> Self {
        let mut record = Self {
            correlation_id,
            path,
            state: ScopeState::Created,
            transitions: Vec::new(),
        };
        record.transitions.push((Utc::now(), ScopeState::Created));
        record
    }

    fn transition(&mut self, next: ScopeState) {
        self.state = next;
        self.transitions.push((Utc::now(), next));
    }
}

/// Allocates and reclaims isolated per-task directories
///
/// Cloneable; all clones share the same record map. The record mutex is held
/// only for brief map reads/writes, never across filesystem I/O.
#[derive(Clone)]
pub struct LifecycleManager {
    temp_root: PathBuf,
    prefix: String,
    records: Arc<Mutex<HashMap<CorrelationId, LifecycleRecord>>>,
}

impl LifecycleManager {
    /// Create a manager rooted at `temp_root`.
    ///
    /// `prefix` must not contain underscores; the scope directory name
    /// format `<prefix>_<correlationID>_<suffix>` relies on them as
    /// separators.
    pub fn new(temp_root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            temp_root: temp_root.into(),
            prefix: prefix.into(),
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open an isolated scope for a task.
    ///
    /// Creates `<temp_root>/<prefix>_<id>_<randomSuffix>` and records it as
    /// `Active`. The random suffix avoids collisions with directories left
    /// behind by a previous process that used the same correlation ID.
    pub async fn open(&self, id: &CorrelationId) -> Result<ScopeGuard> {
        let dir_name = format!("{}_{}_{}", self.prefix, id, random_token(SCOPE_SUFFIX_LEN));
        let path = self.temp_root.join(dir_name);
        tokio::fs::create_dir_all(&path).await?;

        {
            let mut records = lock_records(&self.records);
            let mut record = LifecycleRecord::new(id.clone(), path.clone());
            record.transition(ScopeState::Active);
            records.insert(id.clone(), record);
        }

        tracing::debug!(correlation_id = %id, path = %path.display(), "Opened isolated scope");

        Ok(ScopeGuard {
            manager: self.clone(),
            correlation_id: id.clone(),
            path,
            closed: false,
        })
    }

    /// Look up the lifecycle record for a task, if one exists
    pub fn record(&self, id: &CorrelationId) -> Option<LifecycleRecord> {
        lock_records(&self.records).get(id).cloned()
    }

    /// Remove any directories matching a correlation ID's naming pattern.
    ///
    /// Recovery utility for directories whose normal close never ran
    /// (process crash). Returns the number of directories removed.
    pub async fn cleanup_orphaned(&self, id: &CorrelationId) -> Result<usize> {
        let marker = format!("{}_{}_", self.prefix, id);
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&marker) {
                remove_scope_dir(&entry.path(), id).await;
                removed += 1;
            }
        }

        if removed > 0 {
            tracing::info!(correlation_id = %id, removed, "Cleaned up orphaned scope directories");
        }
        Ok(removed)
    }

    /// Remove scope directories older than `max_age` with no active record.
    ///
    /// Safety net for directories orphaned across process restarts; runs
    /// regardless of correlation ID. Returns the number removed.
    pub async fn sweep_orphans(&self, max_age: Duration) -> Result<usize> {
        let marker = format!("{}_", self.prefix);
        let mut removed = 0;
        let mut entries = match tokio::fs::read_dir(&self.temp_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&marker) {
                continue;
            }
            let Some(id) = parse_correlation_id(name) else {
                continue;
            };

            // Never touch a directory a live task still owns
            let is_active = {
                let records = lock_records(&self.records);
                records
                    .get(&id)
                    .map(|r| r.state == ScopeState::Active)
                    .unwrap_or(false)
            };
            if is_active {
                continue;
            }

            let age = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|mtime| mtime.elapsed().ok());
            match age {
                Some(age) if age >= max_age => {
                    remove_scope_dir(&entry.path(), &id).await;
                    removed += 1;
                }
                _ => {}
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Orphan sweep removed stale scope directories");
        }
        Ok(removed)
    }

    /// Spawn the periodic orphan sweeper.
    ///
    /// Runs [`Self::sweep_orphans`] every `interval` until `cancel` fires.
    pub fn spawn_orphan_sweeper(
        &self,
        interval: Duration,
        max_age: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so a fresh engine
            // does not race tasks that are just starting.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.sweep_orphans(max_age).await {
                            tracing::warn!(error = %e, "Orphan sweep failed");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("Orphan sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    fn mark_closed(&self, id: &CorrelationId, outcome: ScopeOutcome) {
        let mut records = lock_records(&self.records);
        if let Some(record) = records.get_mut(id) {
            record.transition(outcome.state());
            record.transition(ScopeState::Cleaned);
        }
    }
}

/// Guard over one isolated scope directory
///
/// Call [`ScopeGuard::close`] with the task's outcome on the normal path.
/// If the guard is dropped without closing (panic in the wrapped operation,
/// early return), `Drop` removes the directory anyway — cleanup runs on
/// every exit path.
#[must_use = "dropping the guard immediately removes the scope directory"]
pub struct ScopeGuard {
    manager: LifecycleManager,
    correlation_id: CorrelationId,
    path: PathBuf,
    closed: bool,
}

impl ScopeGuard {
    /// The isolated directory this guard owns
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the scope: remove the directory and record the outcome.
    ///
    /// Removal tolerates an already-missing directory (idempotent). Cleanup
    /// failures are logged with the correlation ID and never propagated, so
    /// they cannot mask the task's primary error.
    pub async fn close(mut self, outcome: ScopeOutcome) {
        self.closed = true;
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    correlation_id = %self.correlation_id,
                    path = %self.path.display(),
                    error = %e,
                    "Scope cleanup failed"
                );
            }
        }
        self.manager.mark_closed(&self.correlation_id, outcome);
        tracing::debug!(
            correlation_id = %self.correlation_id,
            outcome = ?outcome,
            "Closed isolated scope"
        );
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Last-resort path: the wrapped operation unwound without closing.
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    correlation_id = %self.correlation_id,
                    path = %self.path.display(),
                    error = %e,
                    "Scope cleanup failed during unwind"
                );
            }
        }
        self.manager
            .mark_closed(&self.correlation_id, ScopeOutcome::Failed);
        tracing::warn!(
            correlation_id = %self.correlation_id,
            "Scope closed during unwind; directory removed"
        );
    }
}

async fn remove_scope_dir(path: &Path, id: &CorrelationId) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(
                correlation_id = %id,
                path = %path.display(),
                error = %e,
                "Failed to remove scope directory"
            );
        }
    }
}

/// Extract the correlation ID from `<prefix>_<id>_<suffix>`.
///
/// Parses from the end so a multi-segment prefix cannot confuse it.
fn parse_correlation_id(dir_name: &str) -> Option<CorrelationId> {
    let mut parts = dir_name.rsplitn(3, '_');
    let _suffix = parts.next()?;
    let id = parts.next()?;
    let _prefix = parts.next()?;
    if id.is_empty() {
        return None;
    }
    Some(CorrelationId::new(id))
}

fn lock_records(
    records: &Arc<Mutex<HashMap<CorrelationId, LifecycleRecord>>>,
) -> std::sync::MutexGuard<'_, HashMap<CorrelationId, LifecycleRecord>> {
    // Record updates cannot panic while holding the lock, so poisoning only
    // occurs if a panic hit between lock and unlock in a dead thread; the
    // map is still usable.
    match records.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(root: &Path) -> LifecycleManager {
        LifecycleManager::new(root, "mdl")
    }

    #[tokio::test]
    async fn open_creates_directory_with_expected_name() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        let scope = manager.open(&id).await.unwrap();

        assert!(scope.path().is_dir());
        let name = scope.path().file_name().unwrap().to_str().unwrap();
        assert!(
            name.starts_with("mdl_abc12345_"),
            "unexpected scope dir name: {name}"
        );
        scope.close(ScopeOutcome::Completed).await;
    }

    #[tokio::test]
    async fn close_removes_directory_and_advances_record() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        let scope = manager.open(&id).await.unwrap();
        let path = scope.path().to_path_buf();
        scope.close(ScopeOutcome::Completed).await;

        assert!(!path.exists(), "directory must be removed on close");
        let record = manager.record(&id).unwrap();
        assert_eq!(record.state, ScopeState::Cleaned);
        let states: Vec<_> = record.transitions.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            states,
            vec![
                ScopeState::Created,
                ScopeState::Active,
                ScopeState::Completed,
                ScopeState::Cleaned,
            ]
        );
    }

    #[tokio::test]
    async fn close_tolerates_already_removed_directory() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        let scope = manager.open(&id).await.unwrap();
        std::fs::remove_dir_all(scope.path()).unwrap();

        // Must not panic or error
        scope.close(ScopeOutcome::Failed).await;
        assert_eq!(manager.record(&id).unwrap().state, ScopeState::Cleaned);
    }

    #[tokio::test]
    async fn drop_without_close_removes_directory() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        let scope = manager.open(&id).await.unwrap();
        let path = scope.path().to_path_buf();
        drop(scope);

        assert!(!path.exists(), "drop must remove the directory");
        assert_eq!(manager.record(&id).unwrap().state, ScopeState::Cleaned);
    }

    #[tokio::test]
    async fn panic_in_task_holding_guard_still_cleans_up() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        let scope = manager.open(&id).await.unwrap();
        let path = scope.path().to_path_buf();

        let handle = tokio::spawn(async move {
            let _scope = scope;
            panic!("backend blew up");
        });
        assert!(handle.await.is_err(), "task should have panicked");

        assert!(
            !path.exists(),
            "directory must be removed even when the holder panics"
        );
    }

    #[tokio::test]
    async fn cleanup_orphaned_removes_matching_directories_only() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("abc12345");

        std::fs::create_dir(root.path().join("mdl_abc12345_x1y2z3")).unwrap();
        std::fs::create_dir(root.path().join("mdl_abc12345_q9w8e7")).unwrap();
        std::fs::create_dir(root.path().join("mdl_other999_a1b2c3")).unwrap();
        std::fs::create_dir(root.path().join("unrelated")).unwrap();

        let removed = manager.cleanup_orphaned(&id).await.unwrap();
        assert_eq!(removed, 2);
        assert!(!root.path().join("mdl_abc12345_x1y2z3").exists());
        assert!(root.path().join("mdl_other999_a1b2c3").exists());
        assert!(root.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn cleanup_orphaned_on_missing_root_is_a_noop() {
        let manager = LifecycleManager::new("/nonexistent/media-dl-test-root", "mdl");
        let removed = manager
            .cleanup_orphaned(&CorrelationId::new("abc12345"))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn sweep_respects_age_threshold() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        std::fs::create_dir(root.path().join("mdl_stale001_aaaaaa")).unwrap();

        // Fresh directory, old threshold: kept
        let removed = manager
            .sweep_orphans(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(root.path().join("mdl_stale001_aaaaaa").exists());

        // Zero threshold: removed
        let removed = manager.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!root.path().join("mdl_stale001_aaaaaa").exists());
    }

    #[tokio::test]
    async fn sweep_skips_directories_of_active_scopes() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        let id = CorrelationId::new("live0001");

        let scope = manager.open(&id).await.unwrap();
        let removed = manager.sweep_orphans(Duration::ZERO).await.unwrap();

        assert_eq!(removed, 0, "active scope must survive the sweep");
        assert!(scope.path().exists());
        scope.close(ScopeOutcome::Completed).await;
    }

    #[tokio::test]
    async fn sweep_ignores_foreign_directories() {
        let root = tempdir().unwrap();
        let manager = manager(root.path());
        std::fs::create_dir(root.path().join("somebody-elses-dir")).unwrap();

        let removed = manager.sweep_orphans(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 0);
        assert!(root.path().join("somebody-elses-dir").exists());
    }

    #[test]
    fn correlation_id_parses_from_dir_name() {
        assert_eq!(
            parse_correlation_id("mdl_abc12345_x1y2z3"),
            Some(CorrelationId::new("abc12345"))
        );
        assert_eq!(parse_correlation_id("mdl__x1y2z3"), None);
        assert_eq!(parse_correlation_id("noseparators"), None);
    }
}
