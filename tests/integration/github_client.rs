//! Integration tests for the search client against a mock API

use chrono::{TimeZone, Utc};
use repo_index_harvester::fetcher::{
    FetchTarget, FetcherError, GithubSearchClient, RetryError, RetryingPageFetcher, SearchSource,
};
use repo_index_harvester::harvester::RateGovernor;
use repo_index_harvester::TimeWindow;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2019, 12, 31, 21, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
    )
}

fn client(server: &MockServer) -> GithubSearchClient {
    GithubSearchClient::new("coq", 100)
        .unwrap()
        .with_base_url(server.uri())
}

/// 6000 requests per minute keeps real-time backoff at 10ms
fn fast_fetcher(server: &MockServer, max_retries: u32) -> RetryingPageFetcher<GithubSearchClient> {
    RetryingPageFetcher::new(client(server), RateGovernor::new(6000)).with_max_retries(max_retries)
}

#[tokio::test]
async fn test_sends_documented_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param(
            "q",
            "language:coq created:2019-12-31T21:00:00..2020-01-01T00:00:00",
        ))
        .and(query_param("sort", "stars"))
        .and(query_param("order", "desc"))
        .and(query_param("per_page", "100"))
        .and(query_param("page", "2"))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"total_count": 1, "items": [{"full_name": "a/b"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let page = client(&server).fetch_page(&window(), 2).await.unwrap();
    assert_eq!(page["total_count"], 1);
    assert_eq!(page["items"][0]["full_name"], "a/b");
}

#[tokio::test]
async fn test_sends_bearer_token_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "items": []})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .with_token(Some("s3cret".to_string()))
        .fetch_page(&window(), 1)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_non_success_status_is_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(403).set_body_string("{\"message\":\"API rate limit exceeded\"}"),
        )
        .mount(&server)
        .await;

    let err = client(&server).fetch_page(&window(), 1).await.unwrap_err();
    match err {
        FetcherError::HttpStatus { status, message } => {
            assert_eq!(status, 403);
            assert!(message.contains("rate limit"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_undecodable_body_is_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client(&server).fetch_page(&window(), 1).await.unwrap_err();
    assert!(matches!(err, FetcherError::ParseError(_)));
}

#[tokio::test]
async fn test_rejected_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"total_count": 4200, "items": []})))
        .mount(&server)
        .await;

    let total = fast_fetcher(&server, 10)
        .total_count_with_retry(&window(), 1)
        .await
        .unwrap();
    assert_eq!(total, 4200);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_missing_items_field_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Validation Failed"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"total_count": 2, "items": [{"id": 1}, {"id": 2}]})),
        )
        .mount(&server)
        .await;

    let items = fast_fetcher(&server, 10)
        .items_with_retry(&window(), 1)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[1]["id"], 2);
}

#[tokio::test]
async fn test_persistent_failure_exhausts_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let err = fast_fetcher(&server, 3)
        .items_with_retry(&window(), 4)
        .await
        .unwrap_err();
    match err {
        RetryError::Exhausted {
            target,
            page,
            attempts,
            last_error,
        } => {
            assert_eq!(target, FetchTarget::Items);
            assert_eq!(page, 4);
            assert_eq!(attempts, 3);
            assert!(matches!(last_error, FetcherError::HttpStatus { status: 502, .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let client = GithubSearchClient::new("coq", 100)
        .unwrap()
        .with_base_url("http://127.0.0.1:1");
    let err = client.fetch_page(&window(), 1).await.unwrap_err();
    assert!(matches!(err, FetcherError::NetworkError(_)));
}
