//! CLI error types and conversions

use crate::fetcher::FetcherError;
use crate::harvester::HarvestError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Harvest error
    #[error("harvest error: {0}")]
    HarvestError(#[from] HarvestError),

    /// HTTP client could not be built
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetcherError),

    /// Checkpoint reset or verification failed
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Summary could not be rendered
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
