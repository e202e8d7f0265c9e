//! Search API access
//!
//! [`SearchSource`] is the transport seam: one call, one page, no retries.
//! [`GithubSearchClient`] implements it over HTTP, and
//! [`RetryingPageFetcher`] wraps any source in the bounded retry policy.

use crate::{Record, TimeWindow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub mod github;
pub mod retry;

pub use github::GithubSearchClient;
pub use retry::{FetchTarget, RetryError, RetryingPageFetcher};

/// Transient fetch errors. Every variant is retried by [`RetryingPageFetcher`].
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// Request could not be sent or the connection failed
    #[error("network error: {0}")]
    NetworkError(String),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {message}")]
    HttpStatus {
        /// Status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Body was not valid JSON
    #[error("parse error: {0}")]
    ParseError(String),

    /// Expected field absent from the page
    #[error("response is missing field '{0}'")]
    MissingField(&'static str),

    /// Field present but of the wrong shape
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client could not be constructed
    #[error("client error: {0}")]
    ClientError(String),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// A paginated search endpoint
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Fetch one page of results for `window`. Pages are 1-based.
    async fn fetch_page(&self, window: &TimeWindow, page: u32) -> FetcherResult<Value>;
}

#[async_trait]
impl<T: SearchSource + ?Sized> SearchSource for Arc<T> {
    async fn fetch_page(&self, window: &TimeWindow, page: u32) -> FetcherResult<Value> {
        (**self).fetch_page(window, page).await
    }
}

/// Take the `items` array out of a page
pub fn extract_items(mut page: Value) -> FetcherResult<Vec<Record>> {
    let items = page
        .get_mut("items")
        .map(Value::take)
        .ok_or(FetcherError::MissingField("items"))?;

    let Value::Array(items) = items else {
        return Err(FetcherError::InvalidResponse(
            "'items' is not an array".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(record) => Ok(record),
            other => Err(FetcherError::InvalidResponse(format!(
                "item {index} is not an object: {other}"
            ))),
        })
        .collect()
}

/// Read the `total_count` field of a page
pub fn extract_total_count(page: Value) -> FetcherResult<u64> {
    let total = page
        .get("total_count")
        .ok_or(FetcherError::MissingField("total_count"))?;
    total.as_u64().ok_or_else(|| {
        FetcherError::InvalidResponse(format!("'total_count' is not an unsigned integer: {total}"))
    })
}
