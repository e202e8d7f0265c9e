//! GitHub repository search client
//!
//! Issues exactly one `GET /search/repositories` per call. Retries and pacing
//! live in [`super::RetryingPageFetcher`] and the orchestrator.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::Client;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

use super::{FetcherError, FetcherResult, SearchSource};
use crate::metrics::{record_http_request, record_rate_limit_remaining};
use crate::TimeWindow;

/// Public GitHub API
pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const SEARCH_ENDPOINT: &str = "/search/repositories";
const SORT_KEY: &str = "stars";
const SORT_ORDER: &str = "desc";
const MAX_ERROR_BODY_CHARS: usize = 300;

/// HTTP client for the repository search endpoint
#[derive(Debug, Clone)]
pub struct GithubSearchClient {
    client: Client,
    base_url: String,
    language: String,
    page_size: u32,
    token: Option<String>,
}

impl GithubSearchClient {
    /// Create a client for `language` against the public API
    pub fn new(language: impl Into<String>, page_size: u32) -> FetcherResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| FetcherError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            language: language.into(),
            page_size,
            token: None,
        })
    }

    /// Point the client at another API root (e.g. GitHub Enterprise or a test server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Authenticate requests with a personal access token
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    /// API root in use
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full search URL without query string
    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_ENDPOINT)
    }

    /// Search qualifier string for `window`
    pub fn query(&self, window: &TimeWindow) -> String {
        format!("language:{} created:{}", self.language, window.query_range())
    }

    /// Query parameters for one page of `window`
    pub fn query_params(&self, window: &TimeWindow, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("q", self.query(window)),
            ("sort", SORT_KEY.to_string()),
            ("order", SORT_ORDER.to_string()),
            ("per_page", self.page_size.to_string()),
            ("page", page.to_string()),
        ]
    }
}

#[async_trait]
impl SearchSource for GithubSearchClient {
    async fn fetch_page(&self, window: &TimeWindow, page: u32) -> FetcherResult<Value> {
        let url = self.search_url();
        debug!(url = %url, window = %window, page, "Requesting search page");

        let mut request = self.client.get(&url).query(&self.query_params(window, page));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                record_http_request(None, started.elapsed());
                return Err(FetcherError::NetworkError(e.to_string()));
            }
        };

        let status = response.status();
        record_http_request(Some(status.as_u16()), started.elapsed());

        if let Some(remaining) = parse_rate_limit_remaining(response.headers()) {
            record_rate_limit_remaining(remaining);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), page, window = %window, "Search request rejected");
            return Err(FetcherError::HttpStatus {
                status: status.as_u16(),
                message: excerpt(&body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FetcherError::ParseError(format!("failed to decode search page: {e}")))
    }
}

/// Read the `x-ratelimit-remaining` header
fn parse_rate_limit_remaining(headers: &HeaderMap) -> Option<u32> {
    let value = headers.get("x-ratelimit-remaining")?.to_str().ok()?;
    match value.parse::<u32>() {
        Ok(remaining) => {
            debug!(remaining, "Search quota remaining");
            Some(remaining)
        }
        Err(e) => {
            warn!("Failed to parse rate limit header '{}': {}", value, e);
            None
        }
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{cut}...")
}
