//! Progress throttling and display formatting
//!
//! Backends emit raw [`ProgressSnapshot`]s at whatever granularity their
//! transfer loop produces, which can be hundreds per second. The
//! [`ProgressReporter`] sits between a backend and its consumer sink and
//! forwards a snapshot only when enough time has passed AND the percentage
//! moved enough, so consumers see a readable stream instead of a firehose.
//! Terminal snapshots always pass through.

use std::time::{Duration, Instant};

use crate::config::ProgressConfig;
use crate::types::ProgressSnapshot;

/// Per-task throttle over raw progress snapshots
///
/// One reporter per task; the forwarding decision is stateful (last
/// forwarded time and percent), so reporters are never shared. The reporter
/// also tracks the stream it observes (first/last update time, byte
/// high-water mark) so [`ProgressReporter::summary`] works even when the
/// fetch never produced a result.
#[derive(Debug)]
pub struct ProgressReporter {
    min_interval: Duration,
    min_percent_change: f32,
    last_forwarded_at: Option<Instant>,
    last_forwarded_percent: Option<f32>,
    first_seen: Option<Instant>,
    last_seen: Option<Instant>,
    peak_bytes: u64,
}

impl ProgressReporter {
    /// Create a reporter with the configured thresholds
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            min_interval: config.min_interval,
            min_percent_change: config.min_percent_change,
            last_forwarded_at: None,
            last_forwarded_percent: None,
            first_seen: None,
            last_seen: None,
            peak_bytes: 0,
        }
    }

    /// Decide whether `snapshot` should be forwarded, updating throttle
    /// state when the answer is yes.
    ///
    /// Forwarded when any of:
    /// - the snapshot is terminal ([`ProgressStatus::is_terminal`]);
    /// - it is the first snapshot seen by this reporter;
    /// - both thresholds are met: at least `min_interval` elapsed since the
    ///   last forward AND the percent moved by at least
    ///   `min_percent_change` (snapshots without a percent satisfy the
    ///   percent condition, since there is nothing to compare).
    ///
    /// Every snapshot counts toward [`ProgressReporter::summary`], forwarded
    /// or not.
    pub fn should_forward(&mut self, snapshot: &ProgressSnapshot) -> bool {
        self.observe(snapshot);

        if snapshot.status.is_terminal() {
            self.record_forward(snapshot);
            return true;
        }

        let Some(last_at) = self.last_forwarded_at else {
            self.record_forward(snapshot);
            return true;
        };

        if last_at.elapsed() < self.min_interval {
            return false;
        }
        let percent_moved = match (snapshot.percent, self.last_forwarded_percent) {
            (Some(now), Some(prev)) => (now - prev).abs() >= self.min_percent_change,
            _ => true,
        };
        if !percent_moved {
            return false;
        }

        self.record_forward(snapshot);
        true
    }

    /// Summarize the stream observed so far.
    ///
    /// Bytes are the high-water `downloaded_bytes` across all snapshots
    /// (retries can rewind the counter), elapsed spans first to last
    /// observed update. A reporter that saw nothing returns a zeroed
    /// summary.
    pub fn summary(&self) -> ProgressSummary {
        let elapsed = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => last.duration_since(first),
            _ => Duration::ZERO,
        };
        ProgressSummary::new(self.peak_bytes, elapsed)
    }

    fn observe(&mut self, snapshot: &ProgressSnapshot) {
        let now = Instant::now();
        if self.first_seen.is_none() {
            self.first_seen = Some(now);
        }
        self.last_seen = Some(now);
        self.peak_bytes = self.peak_bytes.max(snapshot.downloaded_bytes);
    }

    fn record_forward(&mut self, snapshot: &ProgressSnapshot) {
        self.last_forwarded_at = Some(Instant::now());
        if let Some(percent) = snapshot.percent {
            self.last_forwarded_percent = Some(percent);
        }
    }
}

/// Aggregate view over a finished transfer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressSummary {
    /// Total bytes transferred
    pub total_bytes: u64,
    /// Average transfer speed in bytes per second
    pub average_speed_bps: f64,
    /// Wall-clock duration of the transfer
    pub elapsed: Duration,
}

impl ProgressSummary {
    /// Summarize a transfer from its byte count and duration
    pub fn new(total_bytes: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let average_speed_bps = if secs > 0.0 {
            total_bytes as f64 / secs
        } else {
            0.0
        };
        Self {
            total_bytes,
            average_speed_bps,
            elapsed,
        }
    }
}

impl std::fmt::Display for ProgressSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} in {} ({})",
            format_bytes(self.total_bytes),
            format_eta(self.elapsed.as_secs()),
            format_speed(self.average_speed_bps)
        )
    }
}

/// Format a byte count with binary units ("1.5 MiB")
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a transfer speed ("1.5 MiB/s")
pub fn format_speed(bps: f64) -> String {
    format!("{}/s", format_bytes(bps.max(0.0) as u64))
}

/// Format an ETA in seconds as "h:mm:ss" or "m:ss"
pub fn format_eta(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

/// Render a fixed-width ASCII progress bar for a snapshot
///
/// Unknown totals render an indeterminate bar.
pub fn render_bar(snapshot: &ProgressSnapshot, width: usize) -> String {
    match snapshot.percent {
        Some(percent) => {
            let clamped = percent.clamp(0.0, 100.0);
            let filled = ((clamped / 100.0) * width as f32).round() as usize;
            let filled = filled.min(width);
            format!(
                "[{}{}] {:5.1}%",
                "=".repeat(filled),
                " ".repeat(width - filled),
                clamped
            )
        }
        None => format!(
            "[{}] {}",
            "?".repeat(width),
            format_bytes(snapshot.downloaded_bytes)
        ),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(interval_ms: u64, percent: f32) -> ProgressReporter {
        ProgressReporter::new(&ProgressConfig {
            min_interval: Duration::from_millis(interval_ms),
            min_percent_change: percent,
        })
    }

    // ========================================================================
    // Throttling
    // ========================================================================

    #[test]
    fn first_snapshot_is_always_forwarded() {
        let mut reporter = reporter(3000, 5.0);
        let snap = ProgressSnapshot::downloading(1, Some(100), 1.0);
        assert!(reporter.should_forward(&snap));
    }

    #[test]
    fn rapid_snapshots_are_suppressed() {
        let mut reporter = reporter(3000, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, Some(100), 1.0)));

        // Big percent jump but no time elapsed: suppressed
        assert!(!reporter.should_forward(&ProgressSnapshot::downloading(90, Some(100), 1.0)));
    }

    #[test]
    fn small_percent_change_is_suppressed_even_after_interval() {
        let mut reporter = reporter(0, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, Some(100), 1.0)));

        // Interval satisfied (zero), but only 2% moved
        assert!(!reporter.should_forward(&ProgressSnapshot::downloading(12, Some(100), 1.0)));
        // 5% moved relative to the last *forwarded* snapshot
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(15, Some(100), 1.0)));
    }

    #[test]
    fn both_thresholds_met_forwards() {
        let mut reporter = reporter(10, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(0, Some(100), 1.0)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(50, Some(100), 1.0)));
    }

    #[test]
    fn unknown_percent_passes_the_percent_condition() {
        let mut reporter = reporter(0, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, None, 1.0)));
        // Still no percent available; interval alone decides
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(11, None, 1.0)));
    }

    #[test]
    fn terminal_snapshots_bypass_throttling() {
        let mut reporter = reporter(3000, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, Some(100), 1.0)));

        // Immediately after, with no percent movement
        assert!(reporter.should_forward(&ProgressSnapshot::completed(100)));
        assert!(reporter.should_forward(&ProgressSnapshot::errored(10)));
    }

    #[test]
    fn percent_delta_compares_against_last_forwarded_not_last_seen() {
        let mut reporter = reporter(0, 10.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(0, Some(100), 1.0)));

        // Creep upward in sub-threshold steps; none forwarded until the
        // cumulative delta from the last forward reaches 10%
        assert!(!reporter.should_forward(&ProgressSnapshot::downloading(4, Some(100), 1.0)));
        assert!(!reporter.should_forward(&ProgressSnapshot::downloading(8, Some(100), 1.0)));
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, Some(100), 1.0)));
    }

    // ========================================================================
    // Summary and formatting
    // ========================================================================

    #[test]
    fn summary_computes_average_speed() {
        let summary = ProgressSummary::new(1000, Duration::from_secs(10));
        assert_eq!(summary.average_speed_bps, 100.0);
    }

    #[test]
    fn summary_with_zero_elapsed_has_zero_speed() {
        let summary = ProgressSummary::new(1000, Duration::ZERO);
        assert_eq!(summary.average_speed_bps, 0.0);
    }

    #[test]
    fn reporter_summary_covers_the_observed_stream() {
        let mut reporter = reporter(10, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(100, Some(400), 1.0)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(reporter.should_forward(&ProgressSnapshot::completed(400)));

        let summary = reporter.summary();
        assert_eq!(summary.total_bytes, 400);
        assert!(summary.elapsed >= Duration::from_millis(20));
        assert!(summary.average_speed_bps > 0.0);
    }

    #[test]
    fn reporter_summary_counts_suppressed_snapshots() {
        let mut reporter = reporter(3000, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(10, Some(100), 1.0)));
        // Throttled, but still part of the stream
        assert!(!reporter.should_forward(&ProgressSnapshot::downloading(90, Some(100), 1.0)));

        assert_eq!(reporter.summary().total_bytes, 90);
    }

    #[test]
    fn reporter_summary_survives_a_failed_stream() {
        let mut reporter = reporter(0, 5.0);
        assert!(reporter.should_forward(&ProgressSnapshot::downloading(30, None, 1.0)));
        assert!(reporter.should_forward(&ProgressSnapshot::errored(30)));

        assert_eq!(reporter.summary().total_bytes, 30);
    }

    #[test]
    fn reporter_summary_is_zeroed_before_any_snapshot() {
        let reporter = reporter(0, 5.0);
        let summary = reporter.summary();
        assert_eq!(summary.total_bytes, 0);
        assert_eq!(summary.elapsed, Duration::ZERO);
        assert_eq!(summary.average_speed_bps, 0.0);
    }

    #[test]
    fn bytes_formatting() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(1_572_864), "1.5 MiB");
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(42), "0:42");
        assert_eq!(format_eta(125), "2:05");
        assert_eq!(format_eta(3725), "1:02:05");
    }

    #[test]
    fn bar_renders_known_and_unknown_totals() {
        let known = ProgressSnapshot::downloading(50, Some(100), 1.0);
        let bar = render_bar(&known, 10);
        assert!(bar.starts_with("[=====     ]"), "got {bar}");

        let unknown = ProgressSnapshot::downloading(2048, None, 1.0);
        let bar = render_bar(&unknown, 4);
        assert!(bar.starts_with("[????]"), "got {bar}");
    }
}
