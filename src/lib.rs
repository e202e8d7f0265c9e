//! # Repo Index Harvester Library
//!
//! Harvests repository metadata from a paginated, rate-limited search API
//! (GitHub's `/search/repositories`) across a historical date range, and
//! persists the results as gzip-compressed newline-delimited JSON blocks.
//!
//! ## Why windows
//!
//! The search API never returns more than 1000 results for a single query,
//! however many repositories actually match. The harvester therefore slices
//! the requested date range into fixed-length `created:` windows and
//! enumerates each window separately, sleeping a fixed interval before every
//! request to stay under the per-minute request limit.
//!
//! ## Quick Start
//!
//! ```no_run
//! use repo_index_harvester::fetcher::GithubSearchClient;
//! use repo_index_harvester::harvester::{HarvestConfig, HarvestOrchestrator};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::builder("coq", "./coq_repo_index")
//!     .date_range_str("2020-01-01", "2021-01-01")?
//!     .build();
//!
//! let source = GithubSearchClient::new("coq", 100)?;
//! let orchestrator = HarvestOrchestrator::new(config, source)?;
//! let summary = orchestrator.run().await?;
//! println!("{} records in {} blocks", summary.records_harvested, summary.blocks_written);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`harvester`] - Window cursor, rate governor, observer and the orchestrating loop
//! - [`fetcher`] - Search API transport and the bounded retry policy
//! - [`output`] - Block writer producing `block_<id>.jsonl.gz` files
//! - [`resume`] - Checkpoint persistence for resumable runs
//! - [`shutdown`] - Ctrl+C coordination
//! - [`metrics`] - Prometheus counters for pages, retries and blocks
//! - [`cli`] - Command line surface of the `repo-index-harvester` binary

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// CLI command implementations
pub mod cli;

/// Search API access and retry policy
pub mod fetcher;

/// Harvest orchestration
pub mod harvester;

/// Harvest metrics
pub mod metrics;

/// Block output writers
pub mod output;

/// Resume capability for harvest runs
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// One opaque search result as returned by the API.
///
/// The harvester never looks inside a record; it is written out verbatim.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Timestamp format used in `created:` search qualifiers.
pub const QUERY_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Half-open time interval `[start, end)` bounding one search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (inclusive)
    pub start: DateTime<Utc>,
    /// Window end (exclusive)
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window from its bounds
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Length of the window
    pub fn length(&self) -> chrono::TimeDelta {
        self.end - self.start
    }

    /// Render the window as a `created:` range, e.g. `2020-01-01T00:00:00..2020-01-02T00:00:00`
    pub fn query_range(&self) -> String {
        format!(
            "{}..{}",
            self.start.format(QUERY_TIME_FORMAT),
            self.end.format(QUERY_TIME_FORMAT)
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_range())
    }
}
