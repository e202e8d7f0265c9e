//! Resume capability for harvest runs
//!
//! Provides checkpoint persistence with atomic writes and file locking.

pub mod lock;
pub mod state;

pub use lock::{ResumeLock, RUN_LOCK_FILE_NAME};
pub use state::{HarvestCheckpoint, ResumeError, CHECKPOINT_FILE_NAME, MAX_STATE_FILE_SIZE};
