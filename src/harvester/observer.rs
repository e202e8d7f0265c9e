//! Harvest progress observers
//!
//! The orchestrator reports windows, pages, blocks and failures to a
//! [`HarvestObserver`]. Every method has a no-op default so implementations
//! only override what they care about. [`TracingObserver`] is used unless
//! another observer is installed; [`SilentObserver`] suits tests and library
//! callers that do their own reporting.

use tracing::{error, info, warn};

use super::progress::HarvestProgress;
use super::HarvestError;
use crate::output::FlushedBlock;
use crate::TimeWindow;

/// A page that was fetched and handed to the block writer
#[derive(Debug, Clone, Copy)]
pub struct PageFetched<'a> {
    /// Window the page belongs to
    pub window: &'a TimeWindow,
    /// 1-based page number
    pub page: u32,
    /// Pages requested for this window
    pub page_count: u32,
    /// Items on the page
    pub items: usize,
    /// Records waiting for the next block after this page was logged
    pub pending: usize,
}

/// Receives harvest events
pub trait HarvestObserver: Send + Sync {
    /// A window's total count is known and its pages are about to be fetched
    fn on_window_started(&self, _window: &TimeWindow, _total_count: u64, _page_count: u32) {}

    /// A page was fetched and logged
    fn on_page_fetched(&self, _page: PageFetched<'_>) {}

    /// A block was persisted
    fn on_block_flushed(&self, _block: &FlushedBlock) {}

    /// All pages of a window were processed and the cursor advanced
    fn on_window_completed(&self, _window: &TimeWindow, _progress: &HarvestProgress) {}

    /// The run is about to fail with `error`
    fn on_error(&self, _error: &HarvestError) {}
}

/// Observer that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl HarvestObserver for SilentObserver {}

/// Observer that logs events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl HarvestObserver for TracingObserver {
    fn on_window_started(&self, window: &TimeWindow, total_count: u64, page_count: u32) {
        info!(window = %window, total_count, page_count, "Harvesting window");
        if page_count == 0 {
            info!(window = %window, "Window is empty");
        }
    }

    fn on_page_fetched(&self, page: PageFetched<'_>) {
        info!(
            window = %page.window,
            page = page.page,
            page_count = page.page_count,
            items = page.items,
            pending = page.pending,
            "Page fetched"
        );
        if page.items == 0 {
            warn!(window = %page.window, page = page.page, "Page returned no items");
        }
    }

    fn on_window_completed(&self, _window: &TimeWindow, progress: &HarvestProgress) {
        info!("{}", progress.format_progress());
    }

    fn on_error(&self, error: &HarvestError) {
        if error.is_cancelled() {
            warn!(error = %error, "Harvest stopped");
        } else {
            error!(error = %error, "Harvest failed");
        }
    }
}
