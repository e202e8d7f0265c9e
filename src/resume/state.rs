//! Harvest checkpoint persistence
//!
//! A checkpoint captures everything needed to continue a run at the last
//! completed window: the cursor, the next block id and the records that were
//! harvested but not yet flushed. Files are written atomically (temp file,
//! fsync, rename) under an advisory lock.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::harvester::HarvestConfig;
use crate::Record;

/// Current checkpoint schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// File name of the checkpoint inside the resume directory
pub const CHECKPOINT_FILE_NAME: &str = "harvest_checkpoint.json";

/// Maximum accepted checkpoint size (64 MiB). Pending records are stored
/// inline, so this bounds roughly one block's worth of JSON.
pub const MAX_STATE_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Snapshot of a harvest run at a window boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestCheckpoint {
    schema_version: String,
    config: HarvestConfig,
    cursor: DateTime<Utc>,
    next_block_id: u64,
    pending: Vec<Record>,
    windows_completed: u64,
    records_harvested: u64,
    created_at: i64,
    updated_at: i64,
}

impl HarvestCheckpoint {
    /// Create a checkpoint for a fresh run positioned at the configured start
    pub fn new(config: HarvestConfig) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            cursor: config.start_date,
            config,
            next_block_id: 1,
            pending: Vec::new(),
            windows_completed: 0,
            records_harvested: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Location of the checkpoint inside `resume_dir`
    pub fn path_in(resume_dir: &Path) -> PathBuf {
        resume_dir.join(CHECKPOINT_FILE_NAME)
    }

    /// Record progress after a completed window
    pub fn update(
        &mut self,
        cursor: DateTime<Utc>,
        next_block_id: u64,
        pending: &[Record],
        windows_completed: u64,
        records_harvested: u64,
    ) {
        self.cursor = cursor;
        self.next_block_id = next_block_id;
        self.pending = pending.to_vec();
        self.windows_completed = windows_completed;
        self.records_harvested = records_harvested;
        self.updated_at = Utc::now().timestamp_millis();

        debug!(
            cursor = %cursor.to_rfc3339(),
            next_block_id,
            pending = pending.len(),
            windows_completed,
            "Checkpoint updated"
        );
    }

    /// Configuration the checkpoint was taken for
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Cursor position to continue from
    pub fn cursor(&self) -> DateTime<Utc> {
        self.cursor
    }

    /// Id of the next block to write
    pub fn next_block_id(&self) -> u64 {
        self.next_block_id
    }

    /// Records harvested but not yet flushed
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    /// Windows completed so far
    pub fn windows_completed(&self) -> u64 {
        self.windows_completed
    }

    /// Records harvested so far
    pub fn records_harvested(&self) -> u64 {
        self.records_harvested
    }

    /// Creation timestamp (Unix millis)
    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Last update timestamp (Unix millis)
    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    /// Whether this checkpoint can continue a run configured as `config`
    pub fn matches(&self, config: &HarvestConfig) -> bool {
        self.config.same_harvest_as(config)
    }

    /// Structural checks beyond deserialization
    pub fn validate(&self) -> Result<(), ResumeError> {
        self.config
            .validate()
            .map_err(|e| ResumeError::InvalidState(format!("stored configuration: {e}")))?;
        if self.cursor < self.config.start_date {
            return Err(ResumeError::InvalidState(format!(
                "cursor {} precedes start date {}",
                self.cursor.to_rfc3339(),
                self.config.start_date.to_rfc3339()
            )));
        }
        if self.next_block_id == 0 {
            return Err(ResumeError::InvalidState(
                "next_block_id must be at least 1".to_string(),
            ));
        }
        if self.pending.len() >= self.config.block_size {
            return Err(ResumeError::InvalidState(format!(
                "{} pending records but block size is {}",
                self.pending.len(),
                self.config.block_size
            )));
        }
        Ok(())
    }

    /// Save atomically to `path`
    pub fn save(&self, path: &Path) -> Result<(), ResumeError> {
        debug!(
            path = %path.display(),
            pending = self.pending.len(),
            "Saving checkpoint"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string(self)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

        // Make the rename itself durable
        if let Some(parent) = path.parent() {
            if let Ok(dir) = std::fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        info!(
            path = %path.display(),
            cursor = %self.cursor.to_rfc3339(),
            next_block_id = self.next_block_id,
            windows_completed = self.windows_completed,
            "Checkpoint saved"
        );
        Ok(())
    }

    /// Load and validate a checkpoint from `path`
    pub fn load(path: &Path) -> Result<Self, ResumeError> {
        debug!(path = %path.display(), "Loading checkpoint");

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path.with_extension("lock"))
            .map_err(|e| ResumeError::LockError(format!("Failed to create lock file: {e}")))?;
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| ResumeError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(ResumeError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
        let state: HarvestCheckpoint = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize checkpoint");
            ResumeError::DeserializationError(e.to_string())
        })?;

        if state.schema_version != SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: SCHEMA_VERSION.to_string(),
                found: state.schema_version,
            });
        }
        state.validate()?;

        info!(
            cursor = %state.cursor.to_rfc3339(),
            next_block_id = state.next_block_id,
            pending = state.pending.len(),
            "Checkpoint loaded"
        );
        Ok(state)
    }

    /// Delete the checkpoint and its lock file, if present
    pub fn remove(path: &Path) -> Result<(), ResumeError> {
        for file in [path.to_path_buf(), path.with_extension("lock")] {
            match std::fs::remove_file(&file) {
                Ok(()) => debug!(path = %file.display(), "Removed checkpoint file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ResumeError::IoError(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Errors related to checkpoints
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Checkpoint content is inconsistent
    #[error("invalid checkpoint: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
