//! Harvest configuration and constants

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::HarvestError;

/// Hard ceiling on results reachable through a single search query.
/// Results ranked beyond this are unreachable however often a query is repeated.
pub const API_RESULT_CAP: u64 = 1000;

/// Largest `per_page` value accepted by the search API.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Attempts per page before a fetch is considered exhausted.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default `per_page`
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Suffix of the default checkpoint directory, appended to the output directory name
pub const RESUME_DIR_SUFFIX: &str = ".resume";

/// Unauthenticated search quota of the GitHub API
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 10;

/// Records per output block
pub const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Window length in hours
pub const DEFAULT_WINDOW_DELTA_HOURS: u32 = 3;

const DEFAULT_START_DATE: &str = "2020-01-01T00:00:00";
const DEFAULT_END_DATE: &str = "2021-01-01T00:00:00";

/// Complete description of one harvest run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Value of the `language:` search qualifier
    pub language: String,
    /// Results per page (`per_page`)
    pub page_size: u32,
    /// Request budget per minute; drives the governor interval
    pub max_requests_per_minute: u32,
    /// Records per output block
    pub block_size: usize,
    /// Length of one search window in hours
    pub window_delta_hours: u32,
    /// Directory receiving `block_<id>.jsonl.gz` files
    pub output_dir: PathBuf,
    /// First cursor position (inclusive)
    pub start_date: DateTime<Utc>,
    /// Cursor position at which the harvest stops (exclusive)
    pub end_date: DateTime<Utc>,
    /// Attempts per page request
    pub max_retries: u32,
}

impl HarvestConfig {
    /// Start building a configuration with the default sizes and date range
    pub fn builder(language: impl Into<String>, output_dir: impl Into<PathBuf>) -> HarvestConfigBuilder {
        HarvestConfigBuilder::new(language, output_dir)
    }

    /// Window length as a time delta
    pub fn window_delta(&self) -> TimeDelta {
        TimeDelta::hours(i64::from(self.window_delta_hours))
    }

    /// Check every parameter before the loop starts
    pub fn validate(&self) -> Result<(), String> {
        if self.language.trim().is_empty() {
            return Err("language must not be empty".to_string());
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.page_size
            ));
        }
        if self.max_requests_per_minute == 0 {
            return Err("max_requests_per_minute must be positive".to_string());
        }
        if self.block_size == 0 {
            return Err("block_size must be positive".to_string());
        }
        if self.window_delta_hours == 0 {
            return Err("window_delta_hours must be positive".to_string());
        }
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.start_date >= self.end_date {
            return Err(format!(
                "start_date ({}) must be before end_date ({})",
                self.start_date.to_rfc3339(),
                self.end_date.to_rfc3339()
            ));
        }
        Ok(())
    }

    /// Whether `other` describes the same harvest, so its checkpoint can be reused.
    ///
    /// Rate and retry settings may change between runs without invalidating progress.
    pub fn same_harvest_as(&self, other: &HarvestConfig) -> bool {
        self.language == other.language
            && self.page_size == other.page_size
            && self.block_size == other.block_size
            && self.window_delta_hours == other.window_delta_hours
            && self.start_date == other.start_date
            && self.end_date == other.end_date
    }

    /// Checkpoint directory used when none is given: `<output_dir>.resume`,
    /// next to the output directory so the latter only ever holds blocks.
    pub fn default_resume_dir(&self) -> PathBuf {
        match self.output_dir.file_name() {
            Some(name) => {
                let mut sibling = name.to_os_string();
                sibling.push(RESUME_DIR_SUFFIX);
                self.output_dir.with_file_name(sibling)
            }
            None => std::env::temp_dir().join(format!("repo-index-harvester{RESUME_DIR_SUFFIX}")),
        }
    }
}

/// Builder for [`HarvestConfig`]
#[derive(Debug, Clone)]
pub struct HarvestConfigBuilder {
    config: HarvestConfig,
}

impl HarvestConfigBuilder {
    fn new(language: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config: HarvestConfig {
                language: language.into(),
                page_size: DEFAULT_PAGE_SIZE,
                max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
                block_size: DEFAULT_BLOCK_SIZE,
                window_delta_hours: DEFAULT_WINDOW_DELTA_HOURS,
                output_dir: output_dir.into(),
                start_date: default_date(DEFAULT_START_DATE),
                end_date: default_date(DEFAULT_END_DATE),
                max_retries: DEFAULT_MAX_RETRIES,
            },
        }
    }

    /// Set results per page
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.config.page_size = page_size;
        self
    }

    /// Set the request budget per minute
    pub fn max_requests_per_minute(mut self, max_requests_per_minute: u32) -> Self {
        self.config.max_requests_per_minute = max_requests_per_minute;
        self
    }

    /// Set records per block
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config.block_size = block_size;
        self
    }

    /// Set window length in hours
    pub fn window_delta_hours(mut self, hours: u32) -> Self {
        self.config.window_delta_hours = hours;
        self
    }

    /// Set attempts per page request
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the overall range
    pub fn date_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.config.start_date = start;
        self.config.end_date = end;
        self
    }

    /// Set the overall range from textual dates (see [`parse_datetime`])
    pub fn date_range_str(self, start: &str, end: &str) -> Result<Self, HarvestError> {
        let start = parse_datetime(start).map_err(HarvestError::ConfigurationError)?;
        let end = parse_datetime(end).map_err(HarvestError::ConfigurationError)?;
        Ok(self.date_range(start, end))
    }

    /// Override the output directory
    pub fn output_dir(mut self, output_dir: impl AsRef<Path>) -> Self {
        self.config.output_dir = output_dir.as_ref().to_path_buf();
        self
    }

    /// Finish building. Validation happens when the orchestrator is created.
    pub fn build(self) -> HarvestConfig {
        self.config
    }
}

fn default_date(input: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_default()
}

/// Parse a timestamp given as RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC) or `YYYY-MM-DD` (midnight UTC)
pub fn parse_datetime(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{input}': {e}"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| format!("invalid date '{input}'"))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
