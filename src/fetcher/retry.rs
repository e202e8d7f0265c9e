//! Bounded retry around a [`SearchSource`]
//!
//! Any failure of an attempt (network, status, decoding, missing field) is
//! treated the same way: sleep one governor interval and try again. After
//! `max_retries` failed attempts the fetch is exhausted. A permanently broken
//! query and a long outage are indistinguishable here; both end up as
//! [`RetryError::Exhausted`].

use serde_json::Value;
use std::fmt;
use tracing::{debug, error, warn};

use super::{extract_items, extract_total_count, FetcherError, FetcherResult, SearchSource};
use crate::harvester::config::DEFAULT_MAX_RETRIES;
use crate::harvester::RateGovernor;
use crate::metrics::record_fetch_retry;
use crate::shutdown::SharedShutdown;
use crate::{Record, TimeWindow};

/// Which part of a page a retried fetch extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTarget {
    /// The `items` array
    Items,
    /// The `total_count` field
    TotalCount,
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Items => f.write_str("items"),
            FetchTarget::TotalCount => f.write_str("total_count"),
        }
    }
}

/// Terminal outcome of a retried fetch
#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    /// Every attempt failed
    #[error("fetching {target} of page {page} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// What was being fetched
        target: FetchTarget,
        /// Page number (1-based)
        page: u32,
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: FetcherError,
    },

    /// Shutdown was requested during a backoff sleep
    #[error("shutdown requested while retrying page {page}")]
    Cancelled {
        /// Page number (1-based)
        page: u32,
    },
}

/// Wraps a [`SearchSource`] with the fixed-interval retry policy
pub struct RetryingPageFetcher<S> {
    source: S,
    governor: RateGovernor,
    max_retries: u32,
    shutdown: Option<SharedShutdown>,
}

impl<S: SearchSource> RetryingPageFetcher<S> {
    /// Create a fetcher that backs off by `governor.interval()` between attempts
    pub fn new(source: S, governor: RateGovernor) -> Self {
        Self {
            source,
            governor,
            max_retries: DEFAULT_MAX_RETRIES,
            shutdown: None,
        }
    }

    /// Set the number of attempts per fetch (at least one)
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Let backoff sleeps be interrupted by shutdown
    pub fn with_shutdown(mut self, shutdown: Option<SharedShutdown>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Attempts per fetch
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Underlying source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Single attempt, no retry
    pub async fn fetch_page(&self, window: &TimeWindow, page: u32) -> FetcherResult<Value> {
        self.source.fetch_page(window, page).await
    }

    /// Fetch the `items` of a page, retrying on any failure
    pub async fn items_with_retry(
        &self,
        window: &TimeWindow,
        page: u32,
    ) -> Result<Vec<Record>, RetryError> {
        self.with_retry(FetchTarget::Items, window, page, extract_items)
            .await
    }

    /// Fetch the `total_count` of a page, retrying on any failure
    pub async fn total_count_with_retry(
        &self,
        window: &TimeWindow,
        page: u32,
    ) -> Result<u64, RetryError> {
        self.with_retry(FetchTarget::TotalCount, window, page, extract_total_count)
            .await
    }

    async fn with_retry<T>(
        &self,
        target: FetchTarget,
        window: &TimeWindow,
        page: u32,
        extract: fn(Value) -> FetcherResult<T>,
    ) -> Result<T, RetryError> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self.fetch_page(window, page).await.and_then(extract);

            let last_error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(%target, page, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            warn!(
                %target,
                page,
                window = %window,
                attempt,
                max_retries = self.max_retries,
                error = %last_error,
                "Fetch attempt failed"
            );

            if attempt >= self.max_retries {
                error!(
                    %target,
                    page,
                    window = %window,
                    attempts = attempt,
                    "Retry budget exhausted"
                );
                return Err(RetryError::Exhausted {
                    target,
                    page,
                    attempts: attempt,
                    last_error,
                });
            }

            record_fetch_retry(target);
            if !self
                .governor
                .wait_or_shutdown(self.shutdown.as_deref())
                .await
            {
                return Err(RetryError::Cancelled { page });
            }
        }
    }
}
