//! Configuration types for media-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Download behavior configuration (directories, concurrency, size limits)
///
/// Groups settings related to how downloads are admitted and stored.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Final destination directory for completed files (default: "./downloads")
    #[serde(default = "default_target_dir")]
    pub target_dir: PathBuf,

    /// Root under which per-task isolated directories are created (default: "./temp")
    #[serde(default = "default_temp_root_dir")]
    pub temp_root_dir: PathBuf,

    /// Maximum concurrent downloads (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Hard cap on resource size in bytes (None = unlimited)
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// How many terminal tasks to retain for post-hoc inspection (default: 50)
    #[serde(default = "default_recent_tasks_limit")]
    pub recent_tasks_limit: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            target_dir: default_target_dir(),
            temp_root_dir: default_temp_root_dir(),
            max_concurrent: default_max_concurrent(),
            max_file_size: None,
            recent_tasks_limit: default_recent_tasks_limit(),
        }
    }
}

/// Retry behavior configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the initial try (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (default: 2 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter in [0, 1s) to each delay (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Deadlines applied around backend calls
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Deadline for a single fetch attempt (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub per_attempt: Option<Duration>,

    /// Deadline for a whole task, across all retries (None = unlimited)
    #[serde(default, with = "optional_duration_serde")]
    pub overall: Option<Duration>,

    /// Deadline for metadata extraction (default: 30 seconds)
    #[serde(default = "default_metadata_timeout", with = "duration_serde")]
    pub metadata: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            per_attempt: None,
            overall: None,
            metadata: default_metadata_timeout(),
        }
    }
}

/// Progress reporting thresholds
///
/// Raw backend progress events are suppressed unless both the elapsed-time
/// and percent-change thresholds are met. Terminal updates always pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum time between forwarded updates (default: 3 seconds)
    #[serde(default = "default_progress_min_interval", with = "duration_serde")]
    pub min_interval: Duration,

    /// Minimum percent change between forwarded updates (default: 5.0)
    #[serde(default = "default_progress_min_percent_change")]
    pub min_percent_change: f32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            min_interval: default_progress_min_interval(),
            min_percent_change: default_progress_min_percent_change(),
        }
    }
}

/// Orphaned-directory sweep configuration
///
/// A periodic safety net that removes isolated directories left behind by
/// crashed processes, independent of normal scope cleanup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Whether the periodic sweeper runs at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Remove isolated directories older than this (default: 24 hours)
    #[serde(default = "default_orphan_sweep_age", with = "duration_serde")]
    pub orphan_sweep_age: Duration,

    /// Interval between sweep runs (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            orphan_sweep_age: default_orphan_sweep_age(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Top-level configuration for [`crate::DownloadEngine`]
///
/// All fields have sensible defaults; `Config::default()` yields a working
/// engine. Values are immutable once the engine is constructed; per-task
/// overrides go through [`crate::types::DownloadOptions`] instead.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior (directories, concurrency, size limits)
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Deadlines applied around backend calls
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Progress reporting thresholds
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Orphaned-directory sweep
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl Config {
    /// Validate configuration values that serde defaults cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.download.max_concurrent == 0 {
            return Err(Error::Config {
                message: "max_concurrent must be at least 1".to_string(),
                key: Some("download.max_concurrent".to_string()),
            });
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::Config {
                message: format!(
                    "base_delay ({:?}) must not exceed max_delay ({:?})",
                    self.retry.base_delay, self.retry.max_delay
                ),
                key: Some("retry.base_delay".to_string()),
            });
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::Config {
                message: "backoff_multiplier must be at least 1.0".to_string(),
                key: Some("retry.backoff_multiplier".to_string()),
            });
        }
        if self.progress.min_interval.is_zero() {
            return Err(Error::Config {
                message: "min_interval must be non-zero".to_string(),
                key: Some("progress.min_interval".to_string()),
            });
        }
        if !(0.0..=100.0).contains(&self.progress.min_percent_change)
            || self.progress.min_percent_change == 0.0
        {
            return Err(Error::Config {
                message: "min_percent_change must be in (0, 100]".to_string(),
                key: Some("progress.min_percent_change".to_string()),
            });
        }
        if self.sweep.sweep_interval.is_zero() {
            return Err(Error::Config {
                message: "sweep_interval must be non-zero".to_string(),
                key: Some("sweep.sweep_interval".to_string()),
            });
        }
        Ok(())
    }
}

fn default_target_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_temp_root_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_recent_tasks_limit() -> usize {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_metadata_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_progress_min_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_progress_min_percent_change() -> f32 {
    5.0
}

fn default_orphan_sweep_age() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
