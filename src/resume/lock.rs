//! Run lock for a resume directory
//!
//! Only one harvest may own a resume directory at a time. The lock is an
//! advisory `fd-lock` write lock on `harvest.run.lock`, held until the
//! [`ResumeLock`] is dropped. Dropping it also deletes the lock file.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::state::ResumeError;

/// File name of the run lock inside the resume directory
pub const RUN_LOCK_FILE_NAME: &str = "harvest.run.lock";

/// Exclusive ownership of a resume directory
pub struct ResumeLock {
    // The advisory lock lives as long as this descriptor; closing it on drop
    // releases the lock.
    _lock: RwLock<File>,
    path: PathBuf,
}

impl ResumeLock {
    /// Try to take the run lock for `resume_dir` without blocking.
    ///
    /// Fails with [`ResumeError::LockError`] if another process holds it.
    pub fn try_acquire(resume_dir: &Path) -> Result<Self, ResumeError> {
        std::fs::create_dir_all(resume_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

        let path = resume_dir.join(RUN_LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        let mut guard = lock.try_write().map_err(|e| {
            ResumeError::LockError(format!(
                "resume directory is in use by another harvest ({}): {e}",
                path.display()
            ))
        })?;

        // Owner pid, informational only
        if let Err(e) = write_pid(&mut guard) {
            debug!(path = %path.display(), error = %e, "Failed to record owner pid in run lock");
        }
        // Keep the lock past the guard; it is released when the file is closed
        std::mem::forget(guard);

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self { _lock: lock, path })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", std::process::id())?;
    file.flush()
}

impl std::fmt::Debug for ResumeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResumeLock")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Drop for ResumeLock {
    fn drop(&mut self) {
        // Deleted while still held
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove run lock file");
        }
        debug!(path = %self.path.display(), "Run lock released");
    }
}
