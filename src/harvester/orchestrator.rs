//! Window-by-window harvest loop
//!
//! For every window the orchestrator asks page 1 for `total_count`, derives
//! how many pages are reachable under the result cap, then fetches each page
//! after one governor interval and hands the items to the block writer. Once
//! the cursor reaches the end date the writer is finalized exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::config::{HarvestConfig, API_RESULT_CAP};
use super::observer::{HarvestObserver, PageFetched, TracingObserver};
use super::progress::{format_duration, HarvestProgress};
use super::rate_limit::RateGovernor;
use super::window::DateWindowCursor;
use super::HarvestError;
use crate::fetcher::{RetryError, RetryingPageFetcher, SearchSource};
use crate::metrics::{record_page_fetched, record_run_finished, record_window_completed};
use crate::output::ResultBlockWriter;
use crate::resume::{HarvestCheckpoint, ResumeLock};
use crate::shutdown::SharedShutdown;
use crate::TimeWindow;

/// Pages to request for a window reporting `total_count` matches.
///
/// `min(ceil(total_count / page_size), ceil(1000 / page_size))`: results
/// ranked past the cap cannot be paged to, so they are never requested.
pub fn page_count(total_count: u64, page_size: u32) -> u32 {
    if page_size == 0 {
        return 0;
    }
    let page_size = u64::from(page_size);
    let needed = total_count.div_ceil(page_size);
    let reachable = API_RESULT_CAP.div_ceil(page_size);
    // Bounded by the result cap, always fits
    needed.min(reachable) as u32
}

/// Final state of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestStatus {
    /// Every window was harvested and the writer finalized
    Completed,
    /// Stopped by a shutdown request
    Cancelled,
    /// Aborted by an error
    Failed,
}

impl HarvestStatus {
    /// Status describing how `error` ended a run
    pub fn from_error(error: &HarvestError) -> Self {
        if error.is_cancelled() {
            HarvestStatus::Cancelled
        } else {
            HarvestStatus::Failed
        }
    }

    /// Lowercase label, used for metrics and JSON output
    pub fn as_str(&self) -> &'static str {
        match self {
            HarvestStatus::Completed => "completed",
            HarvestStatus::Cancelled => "cancelled",
            HarvestStatus::Failed => "failed",
        }
    }
}

/// Outcome of a completed harvest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestSummary {
    /// Final status
    pub status: HarvestStatus,
    /// Windows harvested by this process
    pub windows_processed: u64,
    /// Windows the date range is divided into
    pub windows_total: u64,
    /// Pages fetched by this process
    pub pages_fetched: u64,
    /// Records harvested, including any harvested before a resume
    pub records_harvested: u64,
    /// Blocks written by this process
    pub blocks_written: u64,
    /// Cursor position after the last window
    pub final_cursor: DateTime<Utc>,
    /// Id the next block would have received
    pub next_block_id: u64,
    /// Cursor position restored from a checkpoint, if any
    pub resumed_from: Option<DateTime<Utc>>,
    /// Wall-clock duration of this process's run, in seconds
    pub elapsed_secs: f64,
}

/// Mutable state of one run
struct RunState {
    cursor: DateWindowCursor,
    writer: ResultBlockWriter,
    progress: HarvestProgress,
    checkpoint: Option<(HarvestCheckpoint, PathBuf)>,
    windows_processed: u64,
    resumed_from: Option<DateTime<Utc>>,
}

/// Drives cursor, fetcher and writer through a whole date range
pub struct HarvestOrchestrator<S> {
    config: HarvestConfig,
    fetcher: RetryingPageFetcher<S>,
    governor: RateGovernor,
    observer: Arc<dyn HarvestObserver>,
    resume_dir: Option<PathBuf>,
    shutdown: Option<SharedShutdown>,
}

impl<S: SearchSource> HarvestOrchestrator<S> {
    /// Validate `config` and wire up the rate governor and retrying fetcher
    pub fn new(config: HarvestConfig, source: S) -> Result<Self, HarvestError> {
        config.validate().map_err(HarvestError::ConfigurationError)?;

        let governor = RateGovernor::new(config.max_requests_per_minute);
        let fetcher = RetryingPageFetcher::new(source, governor).with_max_retries(config.max_retries);

        Ok(Self {
            config,
            fetcher,
            governor,
            observer: Arc::new(TracingObserver),
            resume_dir: None,
            shutdown: None,
        })
    }

    /// Replace the default tracing observer
    pub fn with_observer(mut self, observer: Arc<dyn HarvestObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Checkpoint progress into `resume_dir` and continue from a matching checkpoint
    pub fn with_resume<P: AsRef<Path>>(mut self, resume_dir: Option<P>) -> Self {
        self.resume_dir = resume_dir.map(|dir| dir.as_ref().to_path_buf());
        self
    }

    /// Stop at the next step boundary once shutdown is requested
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.fetcher = self.fetcher.with_shutdown(shutdown.clone());
        self.shutdown = shutdown;
        self
    }

    /// Run configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Retrying fetcher
    pub fn fetcher(&self) -> &RetryingPageFetcher<S> {
        &self.fetcher
    }

    /// Harvest every window from the configured start until the end date.
    ///
    /// Fails with the first exhausted fetch, output or checkpoint error. With
    /// resume enabled, progress up to the last completed window survives a
    /// failure or a shutdown.
    pub async fn run(&self) -> Result<HarvestSummary, HarvestError> {
        let span = info_span!(
            "harvest",
            language = %self.config.language,
            output_dir = %self.config.output_dir.display()
        );

        let result = self.run_inner().instrument(span).await;
        match &result {
            Ok(summary) => record_run_finished(summary.status.as_str()),
            Err(e) => {
                self.observer.on_error(e);
                record_run_finished(HarvestStatus::from_error(e).as_str());
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<HarvestSummary, HarvestError> {
        let started = Instant::now();
        let _lock = match &self.resume_dir {
            Some(dir) => Some(ResumeLock::try_acquire(dir)?),
            None => None,
        };

        let mut state = self.prepare()?;
        info!(
            start = %self.config.start_date.to_rfc3339(),
            end = %self.config.end_date.to_rfc3339(),
            window_hours = self.config.window_delta_hours,
            windows_total = state.progress.windows_total,
            resumed = state.resumed_from.is_some(),
            "Starting harvest"
        );

        match self.harvest_windows(&mut state).await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {
                if let Some((checkpoint, path)) = &state.checkpoint {
                    checkpoint.save(path)?;
                }
                warn!(
                    cursor = %state.cursor.current().to_rfc3339(),
                    "Shutdown requested, progress saved at the last window boundary"
                );
                return Err(HarvestError::Cancelled);
            }
            Err(e) => return Err(e),
        }

        if let Some(block) = state.writer.finalize()? {
            state.progress.blocks_flushed(1);
            self.observer.on_block_flushed(&block);
        }
        if let Some((_, path)) = &state.checkpoint {
            HarvestCheckpoint::remove(path)?;
        }

        let elapsed = started.elapsed();
        info!(
            records = state.progress.records_harvested,
            blocks = state.progress.blocks_written,
            elapsed = %format_duration(elapsed),
            "Harvest completed"
        );

        Ok(HarvestSummary {
            status: HarvestStatus::Completed,
            windows_processed: state.windows_processed,
            windows_total: state.progress.windows_total,
            pages_fetched: state.progress.pages_fetched,
            records_harvested: state.progress.records_harvested,
            blocks_written: state.progress.blocks_written,
            final_cursor: state.cursor.current(),
            next_block_id: state.writer.next_block_id(),
            resumed_from: state.resumed_from,
            elapsed_secs: elapsed.as_secs_f64(),
        })
    }

    /// Build cursor and writer, from a matching checkpoint when resuming
    fn prepare(&self) -> Result<RunState, HarvestError> {
        let config = &self.config;
        let checkpoint_path = self.resume_dir.as_deref().map(HarvestCheckpoint::path_in);
        let restored = match &checkpoint_path {
            Some(path) => self.load_checkpoint(path)?,
            None => None,
        };

        let (cursor, writer, progress, resumed_from) = match &restored {
            Some(checkpoint) => {
                let cursor = DateWindowCursor::resume_at(
                    config.start_date,
                    config.end_date,
                    config.window_delta(),
                    checkpoint.cursor(),
                );
                let writer = ResultBlockWriter::resume(
                    &config.output_dir,
                    config.block_size,
                    checkpoint.next_block_id(),
                    checkpoint.pending().to_vec(),
                )?;
                let progress = HarvestProgress::new(
                    cursor.total_windows(),
                    checkpoint.windows_completed(),
                    checkpoint.records_harvested(),
                );
                (cursor, writer, progress, Some(checkpoint.cursor()))
            }
            None => {
                let cursor = DateWindowCursor::new(config.start_date, config.end_date, config.window_delta());
                let writer = ResultBlockWriter::new(&config.output_dir, config.block_size)?;
                let progress = HarvestProgress::new(cursor.total_windows(), 0, 0);
                (cursor, writer, progress, None)
            }
        };

        let checkpoint = checkpoint_path.map(|path| {
            let checkpoint = restored.unwrap_or_else(|| HarvestCheckpoint::new(config.clone()));
            (checkpoint, path)
        });

        Ok(RunState {
            cursor,
            writer,
            progress,
            checkpoint,
            windows_processed: 0,
            resumed_from,
        })
    }

    fn load_checkpoint(&self, path: &Path) -> Result<Option<HarvestCheckpoint>, HarvestError> {
        if !path.exists() {
            debug!(path = %path.display(), "No checkpoint found, starting fresh");
            return Ok(None);
        }

        let checkpoint = HarvestCheckpoint::load(path)?;
        if !checkpoint.matches(&self.config) {
            warn!(
                path = %path.display(),
                "Checkpoint belongs to a different harvest configuration, ignoring it"
            );
            return Ok(None);
        }

        info!(
            cursor = %checkpoint.cursor().to_rfc3339(),
            next_block_id = checkpoint.next_block_id(),
            pending = checkpoint.pending().len(),
            "Resuming from checkpoint"
        );
        Ok(Some(checkpoint))
    }

    async fn harvest_windows(&self, state: &mut RunState) -> Result<(), HarvestError> {
        while !state.cursor.reached_end() {
            if self.shutdown_requested() {
                return Err(HarvestError::Cancelled);
            }

            let window = state.cursor.window_for_current();
            state.progress.current_window = Some(window.to_string());
            self.harvest_window(&window, state).await?;

            state.cursor.advance();
            state.windows_processed += 1;
            state.progress.window_completed();
            record_window_completed();

            if let Some((checkpoint, path)) = &mut state.checkpoint {
                checkpoint.update(
                    state.cursor.current(),
                    state.writer.next_block_id(),
                    state.writer.pending(),
                    state.progress.windows_completed,
                    state.progress.records_harvested,
                );
                checkpoint.save(path)?;
            }

            self.observer.on_window_completed(&window, &state.progress);
        }
        Ok(())
    }

    async fn harvest_window(&self, window: &TimeWindow, state: &mut RunState) -> Result<(), HarvestError> {
        let total_count = self
            .fetcher
            .total_count_with_retry(window, 1)
            .await
            .map_err(|source| fetch_error(window, source))?;
        let pages = page_count(total_count, self.config.page_size);
        self.observer.on_window_started(window, total_count, pages);

        for page in 1..=pages {
            if !self.governor.wait_or_shutdown(self.shutdown.as_deref()).await {
                return Err(HarvestError::Cancelled);
            }

            let items = self
                .fetcher
                .items_with_retry(window, page)
                .await
                .map_err(|source| fetch_error(window, source))?;
            let count = items.len();
            record_page_fetched(count);
            state.progress.page_fetched(count);

            let flushed = state.writer.log(items)?;
            state.progress.blocks_flushed(flushed.len());

            self.observer.on_page_fetched(PageFetched {
                window,
                page,
                page_count: pages,
                items: count,
                pending: state.writer.pending().len(),
            });
            for block in &flushed {
                self.observer.on_block_flushed(block);
            }
        }
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|shutdown| shutdown.is_shutdown_requested())
    }
}

fn fetch_error(window: &TimeWindow, source: RetryError) -> HarvestError {
    HarvestError::FetchError {
        window: *window,
        source,
    }
}
