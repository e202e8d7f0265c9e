//! Integration tests for the `repo-index-harvester` binary

use assert_cmd::Command;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn harvester() -> Command {
    let mut cmd = Command::cargo_bin("repo-index-harvester").unwrap();
    cmd.env("RUST_LOG", "repo_index_harvester=warn");
    cmd
}

#[test]
fn test_help_lists_harvest_command() {
    let output = harvester().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("harvest"));
    assert!(stdout.contains("--resume"));
}

#[test]
fn test_invalid_page_size_is_rejected() {
    harvester()
        .args(["harvest", "--per-page", "500"])
        .assert()
        .failure();
}

#[test]
fn test_inverted_date_range_fails_before_any_request() {
    let output_dir = TempDir::new().unwrap();
    harvester()
        .args([
            "harvest",
            "--base-url",
            "http://127.0.0.1:1",
            "--start-date",
            "2021-01-01",
            "--end-date",
            "2020-01-01",
            "--output-dir",
        ])
        .arg(output_dir.path())
        .assert()
        .failure()
        .code(1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_harvest_prints_json_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"total_count": 2, "items": [{"id": 1}, {"id": 2}]})),
        )
        .mount(&server)
        .await;

    let root = TempDir::new().unwrap();
    let out_path = root.path().join("coq_repo_index");
    let resume_path = root.path().join("coq_repo_index.resume");
    let uri = server.uri();

    let out_arg = out_path.clone();
    let output = tokio::task::spawn_blocking(move || {
        harvester()
            .args([
                "--output-format",
                "json",
                "--resume",
                "on",
                "harvest",
                "--req-per-min",
                "6000",
                "--time-slot-length",
                "24",
                "--start-date",
                "2020-01-01",
                "--end-date",
                "2020-01-02",
                "--base-url",
                uri.as_str(),
                "--output-dir",
            ])
            .arg(&out_arg)
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["success"], true);
    assert_eq!(summary["summary"]["status"], "completed");
    assert_eq!(summary["summary"]["records_harvested"], 2);
    assert_eq!(summary["summary"]["blocks_written"], 1);

    let files: Vec<String> = std::fs::read_dir(&out_path)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["block_1.jsonl.gz".to_string()]);
    // Checkpoint state lives next to the output directory and is cleared on completion
    assert!(resume_path.is_dir());
    assert_eq!(std::fs::read_dir(&resume_path).unwrap().count(), 0);
}
