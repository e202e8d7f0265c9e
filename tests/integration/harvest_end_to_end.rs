//! End-to-end harvest against a mock search API

use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use repo_index_harvester::fetcher::GithubSearchClient;
use repo_index_harvester::harvester::{
    HarvestConfig, HarvestError, HarvestOrchestrator, HarvestStatus, SilentObserver,
};
use repo_index_harvester::output::block_path;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FIRST_WINDOW: &str = "language:coq created:2019-12-31T00:00:00..2020-01-01T00:00:00";
const SECOND_WINDOW: &str = "language:coq created:2020-01-01T00:00:00..2020-01-02T00:00:00";

fn read_block(path: &Path) -> Vec<Value> {
    let file = std::fs::File::open(path).unwrap();
    BufReader::new(GzDecoder::new(file))
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect()
}

fn config(output_dir: &Path, block_size: usize) -> HarvestConfig {
    HarvestConfig::builder("coq", output_dir)
        .page_size(100)
        .max_requests_per_minute(6000)
        .block_size(block_size)
        .window_delta_hours(24)
        .max_retries(3)
        .date_range(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 3, 0, 0, 0).unwrap(),
        )
        .build()
}

fn orchestrator(server: &MockServer, config: HarvestConfig) -> HarvestOrchestrator<GithubSearchClient> {
    let source = GithubSearchClient::new("coq", 100)
        .unwrap()
        .with_base_url(server.uri());
    HarvestOrchestrator::new(config, source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
}

async fn mount_window(server: &MockServer, query: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", query))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_harvest_writes_blocks_in_order() {
    let server = MockServer::start().await;
    mount_window(
        &server,
        FIRST_WINDOW,
        json!({
            "total_count": 3,
            "items": [
                {"full_name": "a/one", "stargazers_count": 30, "owner": {"login": "a"}},
                {"full_name": "b/two", "stargazers_count": 20},
                {"full_name": "c/three", "stargazers_count": 10}
            ]
        }),
    )
    .await;
    mount_window(&server, SECOND_WINDOW, json!({"total_count": 0, "items": []})).await;

    let output = TempDir::new().unwrap();
    let summary = orchestrator(&server, config(output.path(), 2))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, HarvestStatus::Completed);
    assert_eq!(summary.windows_processed, 2);
    assert_eq!(summary.records_harvested, 3);
    assert_eq!(summary.blocks_written, 2);

    // count + page for the first window, count only for the empty one
    assert_eq!(server.received_requests().await.unwrap().len(), 3);

    let first = read_block(&block_path(output.path(), 1));
    assert_eq!(first.len(), 2);
    assert_eq!(first[0]["full_name"], "a/one");
    assert_eq!(first[0]["owner"], json!({"login": "a"}));
    assert_eq!(first[1]["full_name"], "b/two");

    let last = read_block(&block_path(output.path(), 2));
    assert_eq!(last, vec![json!({"full_name": "c/three", "stargazers_count": 10})]);
    assert!(!block_path(output.path(), 3).exists());
}

#[tokio::test]
async fn test_result_cap_limits_page_requests() {
    let server = MockServer::start().await;
    let items: Vec<Value> = (0..100).map(|i| json!({"id": i})).collect();
    mount_window(&server, FIRST_WINDOW, json!({"total_count": 2500, "items": items})).await;
    mount_window(&server, SECOND_WINDOW, json!({"total_count": 0, "items": []})).await;

    let output = TempDir::new().unwrap();
    let summary = orchestrator(&server, config(output.path(), 1000))
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_fetched, 10);
    assert_eq!(summary.records_harvested, 1000);

    let requests = server.received_requests().await.unwrap();
    let max_page = requests
        .iter()
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "page")
                .and_then(|(_, value)| value.parse::<u32>().ok())
        })
        .max();
    assert_eq!(max_page, Some(10));
    assert_eq!(requests.len(), 12);
}

#[tokio::test]
async fn test_persistent_failure_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Validation Failed"))
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let err = orchestrator(&server, config(output.path(), 2))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, HarvestError::FetchError { .. }));
    let message = err.to_string();
    assert!(message.contains("2019-12-31T00:00:00..2020-01-01T00:00:00"), "{message}");
    assert!(message.contains("total_count of page 1"), "{message}");
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}
