//! Harvest orchestration and rate governance
//!
//! This module provides the loop that walks a date range window by window
//! and turns search pages into persisted blocks.
//!
//! # Overview
//!
//! 1. **Configuration**: describe the run with [`config::HarvestConfig`]
//! 2. **Windows**: [`window::DateWindowCursor`] slices the range into fixed-length windows
//! 3. **Pacing**: [`rate_limit::RateGovernor`] spaces every request uniformly
//! 4. **Execution**: [`orchestrator::HarvestOrchestrator`] fetches each window's pages
//!    through [`crate::fetcher::RetryingPageFetcher`] and hands the items to
//!    [`crate::output::ResultBlockWriter`]
//! 5. **Observation**: [`observer::HarvestObserver`] receives page, block and error events
//!
//! # Error Handling
//!
//! All operations return `Result<T, HarvestError>`:
//! - Configuration errors are detected before the first request
//! - Transient fetch failures are retried inside the fetcher; only an
//!   exhausted retry budget reaches this level, and it aborts the run
//! - Output and resume errors are fatal

pub mod config;
pub mod observer;
pub mod orchestrator;
pub mod progress;
pub mod rate_limit;
pub mod window;

pub use config::{HarvestConfig, HarvestConfigBuilder};
pub use observer::{HarvestObserver, PageFetched, SilentObserver, TracingObserver};
pub use orchestrator::{page_count, HarvestOrchestrator, HarvestStatus, HarvestSummary};
pub use progress::HarvestProgress;
pub use rate_limit::RateGovernor;
pub use window::DateWindowCursor;

use crate::fetcher::RetryError;
use crate::output::OutputError;
use crate::resume::ResumeError;
use crate::TimeWindow;

/// Harvest errors
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Invalid configuration, detected before the loop starts
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// A page could not be fetched within the retry budget
    #[error("window {window}: {source}")]
    FetchError {
        /// Window being harvested when the fetch failed
        window: TimeWindow,
        /// Underlying retry failure
        #[source]
        source: RetryError,
    },

    /// Block output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Checkpoint error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Shutdown was requested before the run completed
    #[error("harvest cancelled: shutdown requested")]
    Cancelled,
}

impl HarvestError {
    /// Whether the error was caused by a shutdown request rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            HarvestError::Cancelled
                | HarvestError::FetchError {
                    source: RetryError::Cancelled { .. },
                    ..
                }
        )
    }
}
