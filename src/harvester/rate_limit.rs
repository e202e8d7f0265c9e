//! Uniform request spacing
//!
//! The search API allows a fixed number of requests per minute. Rather than a
//! token bucket, every request is preceded by the same sleep, and the same
//! interval doubles as the retry backoff: most transient failures are
//! rate-limit rejections that clear after one interval.

use std::time::Duration;
use tokio::time::sleep;

use crate::metrics::record_governor_wait;
use crate::shutdown::ShutdownCoordinator;

/// Fixed-interval rate governor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGovernor {
    max_requests_per_minute: u32,
}

impl RateGovernor {
    /// Create a governor for the given request budget. A budget of zero is treated as one.
    pub fn new(max_requests_per_minute: u32) -> Self {
        Self {
            max_requests_per_minute: max_requests_per_minute.max(1),
        }
    }

    /// Configured request budget
    pub fn max_requests_per_minute(&self) -> u32 {
        self.max_requests_per_minute
    }

    /// Delay between two requests: `60s / max_requests_per_minute`
    pub fn interval(&self) -> Duration {
        Duration::from_secs(60) / self.max_requests_per_minute
    }

    /// Sleep for one interval
    pub async fn wait(&self) {
        let interval = self.interval();
        sleep(interval).await;
        record_governor_wait(interval);
    }

    /// Sleep for one interval unless shutdown is requested first.
    ///
    /// Returns `false` when the wait was cut short by shutdown.
    pub async fn wait_or_shutdown(&self, shutdown: Option<&ShutdownCoordinator>) -> bool {
        let Some(shutdown) = shutdown else {
            self.wait().await;
            return true;
        };
        if shutdown.is_shutdown_requested() {
            return false;
        }
        tokio::select! {
            _ = self.wait() => true,
            _ = shutdown.wait_for_shutdown() => false,
        }
    }
}
