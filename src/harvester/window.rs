//! Date window cursor
//!
//! The cursor holds a single timestamp that advances by a fixed delta. The
//! window queried for a cursor position always *trails* it by one delta:
//! `(current - delta, current)`. The very first window therefore starts one
//! delta before the configured start date. This offset is kept as-is; callers
//! relying on exact coverage should account for it.

use chrono::{DateTime, TimeDelta, Utc};

use crate::TimeWindow;

/// Position within the overall `[start, end)` range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateWindowCursor {
    current: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delta: TimeDelta,
}

impl DateWindowCursor {
    /// Create a cursor positioned at `start`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, delta: TimeDelta) -> Self {
        Self::resume_at(start, end, delta, start)
    }

    /// Create a cursor positioned at a previously saved `current`
    pub fn resume_at(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        delta: TimeDelta,
        current: DateTime<Utc>,
    ) -> Self {
        Self {
            current,
            start,
            end,
            delta,
        }
    }

    /// True once the cursor has reached or passed the end date
    pub fn reached_end(&self) -> bool {
        self.current >= self.end
    }

    /// Window for the current position: `(current - delta, current)`
    pub fn window_for_current(&self) -> TimeWindow {
        TimeWindow::new(self.current - self.delta, self.current)
    }

    /// Move forward by one delta. Does nothing once the end is reached.
    pub fn advance(&mut self) {
        if !self.reached_end() {
            self.current += self.delta;
        }
    }

    /// Current cursor timestamp
    pub fn current(&self) -> DateTime<Utc> {
        self.current
    }

    /// Configured start date
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Configured end date
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Window length
    pub fn delta(&self) -> TimeDelta {
        self.delta
    }

    /// Number of windows a full run processes: `ceil((end - start) / delta)`
    pub fn total_windows(&self) -> u64 {
        windows_between(self.start, self.end, self.delta)
    }

    /// Number of windows already passed
    pub fn windows_completed(&self) -> u64 {
        windows_between(self.start, self.current.min(self.end), self.delta)
    }
}

fn windows_between(from: DateTime<Utc>, to: DateTime<Utc>, delta: TimeDelta) -> u64 {
    let span = (to - from).num_seconds();
    let step = delta.num_seconds();
    if span <= 0 || step <= 0 {
        return 0;
    }
    (span as u64).div_ceil(step as u64)
}
