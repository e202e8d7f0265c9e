//! Progress tracking for long-running harvests.
//!
//! A year of 3-hour windows at the default request budget takes days, so the
//! orchestrator keeps running counters and derives a completion percentage and
//! an ETA from the share of windows already processed.

use std::time::{Duration, Instant};

/// Running counters of one harvest.
#[derive(Debug, Clone)]
pub struct HarvestProgress {
    /// Windows the full date range is divided into.
    pub windows_total: u64,
    /// Windows finished, including those finished before a resume.
    pub windows_completed: u64,
    /// Pages fetched in this process.
    pub pages_fetched: u64,
    /// Records harvested, including those harvested before a resume.
    pub records_harvested: u64,
    /// Blocks written in this process.
    pub blocks_written: u64,
    /// Window currently being harvested, e.g. `2020-03-01T00:00:00..2020-03-01T03:00:00`.
    pub current_window: Option<String>,
    started: Instant,
    windows_at_start: u64,
}

impl HarvestProgress {
    /// Start tracking a run of `windows_total` windows, `windows_completed` of
    /// which were already done by an earlier process.
    pub fn new(windows_total: u64, windows_completed: u64, records_harvested: u64) -> Self {
        Self {
            windows_total,
            windows_completed,
            pages_fetched: 0,
            records_harvested,
            blocks_written: 0,
            current_window: None,
            started: Instant::now(),
            windows_at_start: windows_completed,
        }
    }

    /// Count a fetched page and its items.
    pub fn page_fetched(&mut self, items: usize) {
        self.pages_fetched += 1;
        self.records_harvested = self.records_harvested.saturating_add(items as u64);
    }

    /// Count persisted blocks.
    pub fn blocks_flushed(&mut self, blocks: usize) {
        self.blocks_written += blocks as u64;
    }

    /// Count a finished window.
    pub fn window_completed(&mut self) {
        self.windows_completed = self.windows_completed.saturating_add(1);
    }

    /// Time since tracking started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Share of windows finished, 0-100.
    pub fn percentage(&self) -> f64 {
        if self.windows_total == 0 {
            return 100.0;
        }
        let done = self.windows_completed.min(self.windows_total);
        (done as f64 / self.windows_total as f64) * 100.0
    }

    /// Estimate remaining time from the windows finished by this process.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        let done_here = self.windows_completed.saturating_sub(self.windows_at_start);
        let remaining = self.windows_total.saturating_sub(self.windows_completed);
        if done_here == 0 || remaining == 0 {
            return None;
        }
        let per_window = self.elapsed().as_secs_f64() / done_here as f64;
        Some(Duration::from_secs_f64(per_window * remaining as f64))
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Harvested {} records - {:.1}% of windows ({}/{})",
            self.records_harvested,
            self.percentage(),
            self.windows_completed,
            self.windows_total
        )];

        if let Some(window) = &self.current_window {
            parts.push(format!("(last {window})"));
        }

        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

/// Compact duration: `42s`, `17m`, `3.5h`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
