//! Block output writers

pub mod block;

pub use block::{block_path, FlushedBlock, ResultBlockWriter, BLOCK_FILE_PREFIX, BLOCK_FILE_SUFFIX};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Compression stream error
    #[error("compression error: {0}")]
    CompressionError(String),

    /// Writer misconfiguration
    #[error("invalid writer configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;
