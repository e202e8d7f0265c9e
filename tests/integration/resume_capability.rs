//! Integration tests for checkpointing and resumed harvests

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use repo_index_harvester::fetcher::{FetcherError, FetcherResult, SearchSource};
use repo_index_harvester::harvester::{HarvestConfig, HarvestError, HarvestOrchestrator, SilentObserver};
use repo_index_harvester::output::block_path;
use repo_index_harvester::resume::{HarvestCheckpoint, ResumeError, ResumeLock};
use repo_index_harvester::TimeWindow;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn date(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
}

/// Four records per window; the window ending on `broken_window_end` fails until healed
struct FlakySource {
    broken_window_end: DateTime<Utc>,
    healed: AtomicBool,
}

#[async_trait]
impl SearchSource for FlakySource {
    async fn fetch_page(&self, window: &TimeWindow, _page: u32) -> FetcherResult<Value> {
        if window.end == self.broken_window_end && !self.healed.load(Ordering::SeqCst) {
            return Err(FetcherError::HttpStatus {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        let items: Vec<Value> = (0..4)
            .map(|i| json!({"window_end": window.end.to_rfc3339(), "n": i}))
            .collect();
        Ok(json!({"total_count": 4, "items": items}))
    }
}

fn config(output_dir: &Path) -> HarvestConfig {
    HarvestConfig::builder("coq", output_dir)
        .block_size(3)
        .window_delta_hours(24)
        .max_retries(2)
        .date_range(date(1), date(5))
        .build()
}

fn non_block_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !(name.starts_with("block_") && name.ends_with(".jsonl.gz")))
        .collect()
}

fn count_records(path: &Path) -> usize {
    BufReader::new(GzDecoder::new(std::fs::File::open(path).unwrap()))
        .lines()
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_failed_run_resumes_at_last_window_boundary() {
    let output = TempDir::new().unwrap();
    let source = Arc::new(FlakySource {
        broken_window_end: date(3),
        healed: AtomicBool::new(false),
    });

    let first = HarvestOrchestrator::new(config(output.path()), source.clone())
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(output.path()));
    let err = first.run().await.unwrap_err();
    assert!(matches!(err, HarvestError::FetchError { .. }));

    // Windows ending 2020-01-01 and 2020-01-02 completed: 8 records, 2 blocks, 2 pending
    let checkpoint = HarvestCheckpoint::load(&HarvestCheckpoint::path_in(output.path())).unwrap();
    assert_eq!(checkpoint.cursor(), date(3));
    assert_eq!(checkpoint.next_block_id(), 3);
    assert_eq!(checkpoint.pending().len(), 2);
    assert_eq!(checkpoint.records_harvested(), 8);

    source.healed.store(true, Ordering::SeqCst);
    let second = HarvestOrchestrator::new(config(output.path()), source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(output.path()));
    let summary = second.run().await.unwrap();

    assert_eq!(summary.resumed_from, Some(date(3)));
    assert_eq!(summary.windows_processed, 2);
    assert_eq!(summary.records_harvested, 16);

    // 16 records in blocks of 3: five full blocks and a final block of one
    let total: usize = (1..=6)
        .map(|id| count_records(&block_path(output.path(), id)))
        .sum();
    assert_eq!(total, 16);
    assert_eq!(count_records(&block_path(output.path(), 6)), 1);
    assert!(!block_path(output.path(), 7).exists());
    assert!(!HarvestCheckpoint::path_in(output.path()).exists());
}

#[tokio::test(start_paused = true)]
async fn test_resume_off_starts_over() {
    let output = TempDir::new().unwrap();
    let mut stale = HarvestCheckpoint::new(config(output.path()));
    stale.update(date(4), 9, &[], 3, 12);
    stale.save(&HarvestCheckpoint::path_in(output.path())).unwrap();

    let source = Arc::new(FlakySource {
        broken_window_end: date(30),
        healed: AtomicBool::new(true),
    });
    let summary = HarvestOrchestrator::new(config(output.path()), source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .run()
        .await
        .unwrap();

    assert!(summary.resumed_from.is_none());
    assert_eq!(summary.windows_processed, 4);
    // Checkpoint untouched when resume is off
    assert!(HarvestCheckpoint::path_in(output.path()).exists());
}

#[test]
fn test_checkpoint_json_carries_schema_version() {
    let dir = TempDir::new().unwrap();
    let path = HarvestCheckpoint::path_in(dir.path());
    HarvestCheckpoint::new(config(dir.path())).save(&path).unwrap();

    let json = std::fs::read_to_string(&path).unwrap();
    assert!(json.contains("\"schema_version\":\"1.0.0\""));
    assert!(json.contains("\"next_block_id\":1"));
}

#[test]
fn test_checkpoint_with_broken_invariants_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = HarvestCheckpoint::path_in(dir.path());
    HarvestCheckpoint::new(config(dir.path())).save(&path).unwrap();

    let mut value: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    value["next_block_id"] = json!(0);
    std::fs::write(&path, value.to_string()).unwrap();

    assert!(matches!(
        HarvestCheckpoint::load(&path),
        Err(ResumeError::InvalidState(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_locked_resume_dir_is_refused() {
    let output = TempDir::new().unwrap();
    let _held = ResumeLock::try_acquire(output.path()).unwrap();

    let source = Arc::new(FlakySource {
        broken_window_end: date(30),
        healed: AtomicBool::new(true),
    });
    let err = HarvestOrchestrator::new(config(output.path()), source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(output.path()))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::ResumeError(ResumeError::LockError(_))));
}

#[tokio::test(start_paused = true)]
async fn test_output_dir_holds_only_blocks_after_resumed_run() {
    let output = TempDir::new().unwrap();
    let output_dir = output.path().join("coq_repo_index");
    let resume_dir = config(&output_dir).default_resume_dir();
    let source = Arc::new(FlakySource {
        broken_window_end: date(3),
        healed: AtomicBool::new(false),
    });

    let first = HarvestOrchestrator::new(config(&output_dir), source.clone())
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(&resume_dir));
    first.run().await.unwrap_err();
    assert!(non_block_files(&output_dir).is_empty());
    assert!(HarvestCheckpoint::path_in(&resume_dir).exists());

    source.healed.store(true, Ordering::SeqCst);
    let second = HarvestOrchestrator::new(config(&output_dir), source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(&resume_dir));
    let summary = second.run().await.unwrap();
    assert!(summary.resumed_from.is_some());

    assert!(non_block_files(&output_dir).is_empty(), "{:?}", non_block_files(&output_dir));
    for id in 1..=6 {
        let file = std::fs::File::open(block_path(&output_dir, id)).unwrap();
        assert!(BufReader::new(GzDecoder::new(file)).lines().all(|line| line.is_ok()));
    }
    // Completed runs leave no checkpoint or lock files behind
    assert_eq!(std::fs::read_dir(&resume_dir).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_completed_run_removes_run_lock() {
    let output = TempDir::new().unwrap();
    let source = Arc::new(FlakySource {
        broken_window_end: date(30),
        healed: AtomicBool::new(true),
    });

    HarvestOrchestrator::new(config(output.path()), source)
        .unwrap()
        .with_observer(Arc::new(SilentObserver))
        .with_resume(Some(output.path()))
        .run()
        .await
        .unwrap();

    assert!(non_block_files(output.path()).is_empty(), "{:?}", non_block_files(output.path()));
}
