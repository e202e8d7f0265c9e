//! Gzip NDJSON block writer
//!
//! Records accumulate in memory until `block_size` of them are pending, at
//! which point exactly the first `block_size` records are written to
//! `block_<id>.jsonl.gz`. A single large `log` call can produce several
//! blocks. Whatever remains at the end of a run goes out through
//! [`ResultBlockWriter::finalize`] as one undersized block.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{OutputError, OutputResult};
use crate::metrics::record_block_written;
use crate::Record;

/// File name prefix of every block
pub const BLOCK_FILE_PREFIX: &str = "block_";

/// File name suffix of every block
pub const BLOCK_FILE_SUFFIX: &str = ".jsonl.gz";

const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Path of block `block_id` inside `output_dir`
pub fn block_path(output_dir: &Path, block_id: u64) -> PathBuf {
    output_dir.join(format!("{BLOCK_FILE_PREFIX}{block_id}{BLOCK_FILE_SUFFIX}"))
}

/// A block that has been persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedBlock {
    /// Sequential block id
    pub block_id: u64,
    /// File the block was written to
    pub path: PathBuf,
    /// Records in the block
    pub records: usize,
    /// Time spent serializing, compressing and persisting
    pub elapsed: Duration,
    /// Whether the block was written by [`ResultBlockWriter::finalize`]
    pub is_final: bool,
}

/// Accumulates records and flushes them as numbered gzip blocks
#[derive(Debug)]
pub struct ResultBlockWriter {
    output_dir: PathBuf,
    block_size: usize,
    next_block_id: u64,
    pending: Vec<Record>,
    blocks_written: u64,
    records_written: u64,
}

impl ResultBlockWriter {
    /// Create a writer whose first block is `block_1`. Creates `output_dir` if absent.
    pub fn new<P: AsRef<Path>>(output_dir: P, block_size: usize) -> OutputResult<Self> {
        Self::resume(output_dir, block_size, 1, Vec::new())
    }

    /// Create a writer continuing at `next_block_id` with records already pending
    pub fn resume<P: AsRef<Path>>(
        output_dir: P,
        block_size: usize,
        next_block_id: u64,
        pending: Vec<Record>,
    ) -> OutputResult<Self> {
        if block_size == 0 {
            return Err(OutputError::InvalidConfiguration(
                "block size must be positive".to_string(),
            ));
        }

        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            OutputError::IoError(format!(
                "Failed to create output directory {}: {e}",
                output_dir.display()
            ))
        })?;

        debug!(
            output_dir = %output_dir.display(),
            block_size,
            next_block_id,
            pending = pending.len(),
            "Block writer ready"
        );

        Ok(Self {
            output_dir,
            block_size,
            next_block_id: next_block_id.max(1),
            pending,
            blocks_written: 0,
            records_written: 0,
        })
    }

    /// Append `items`, flushing one block per full `block_size` pending.
    ///
    /// Returns the blocks written by this call, in order.
    pub fn log(&mut self, items: Vec<Record>) -> OutputResult<Vec<FlushedBlock>> {
        self.pending.extend(items);

        let mut flushed = Vec::new();
        while self.pending.len() >= self.block_size {
            flushed.push(self.flush(self.block_size, false)?);
        }
        Ok(flushed)
    }

    /// Write any pending records as a final, possibly undersized, block
    pub fn finalize(&mut self) -> OutputResult<Option<FlushedBlock>> {
        if self.pending.is_empty() {
            debug!("No pending records at finalize");
            return Ok(None);
        }
        info!(records = self.pending.len(), "Writing final block");
        let count = self.pending.len();
        self.flush(count, true).map(Some)
    }

    /// Persist the first `count` pending records as the next block.
    ///
    /// The block is written to a temporary file and renamed into place, so a
    /// crash never leaves a truncated `block_<id>.jsonl.gz` behind.
    fn flush(&mut self, count: usize, is_final: bool) -> OutputResult<FlushedBlock> {
        let started = Instant::now();
        let block_id = self.next_block_id;
        let path = block_path(&self.output_dir, block_id);
        let count = count.min(self.pending.len());

        let temp_file = tempfile::NamedTempFile::new_in(&self.output_dir)
            .map_err(|e| OutputError::IoError(format!("Failed to create temp file: {e}")))?;
        let buffered = BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, temp_file);
        let mut encoder = GzEncoder::new(buffered, Compression::default());

        for record in &self.pending[..count] {
            serde_json::to_writer(&mut encoder, record)
                .map_err(|e| OutputError::SerializationError(e.to_string()))?;
            encoder
                .write_all(b"\n")
                .map_err(|e| OutputError::CompressionError(e.to_string()))?;
        }

        let buffered = encoder
            .finish()
            .map_err(|e| OutputError::CompressionError(e.to_string()))?;
        let temp_file = buffered
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to flush block buffer: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync block: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| OutputError::IoError(format!("Failed to persist {}: {e}", path.display())))?;

        self.pending.drain(..count);
        self.next_block_id += 1;
        self.blocks_written += 1;
        self.records_written += count as u64;

        let elapsed = started.elapsed();
        record_block_written(count, elapsed);
        info!(
            block_id,
            records = count,
            elapsed_ms = elapsed.as_millis(),
            path = %path.display(),
            "Block written"
        );

        Ok(FlushedBlock {
            block_id,
            path,
            records: count,
            elapsed,
            is_final,
        })
    }

    /// Records waiting for the next flush
    pub fn pending(&self) -> &[Record] {
        &self.pending
    }

    /// Id the next block will receive
    pub fn next_block_id(&self) -> u64 {
        self.next_block_id
    }

    /// Records per block
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Blocks written by this writer instance
    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    /// Records written by this writer instance
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Directory receiving blocks
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
