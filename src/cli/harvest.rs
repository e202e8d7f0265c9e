//! Harvest command implementation

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use super::CliError;
use crate::fetcher::github::DEFAULT_BASE_URL;
use crate::fetcher::GithubSearchClient;
use crate::harvester::config::{
    parse_datetime, DEFAULT_BLOCK_SIZE, DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_RETRIES,
    DEFAULT_PAGE_SIZE, DEFAULT_WINDOW_DELTA_HOURS, MAX_PAGE_SIZE,
};
use crate::harvester::{HarvestConfig, HarvestError, HarvestOrchestrator, HarvestStatus, HarvestSummary};
use crate::resume::HarvestCheckpoint;
use crate::shutdown::SharedShutdown;

/// Upper bound for `--max-retries`; more attempts only delay the inevitable failure
const MAX_RETRIES_LIMIT: i64 = 50;

/// Resume modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// No checkpoints are read or written
    Off,
    /// Continue from a matching checkpoint and checkpoint every window
    On,
    /// Delete any checkpoint, then run as `on`
    Reset,
    /// Check checkpoint integrity, then run as `on`
    Verify,
}

impl ResumeMode {
    /// Whether checkpoints are written during the run
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ResumeMode::Off)
    }
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(ResumeMode::Off),
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            "verify" => Ok(ResumeMode::Verify),
            _ => Err(format!(
                "Invalid resume mode: {s}. Valid options: on, off, reset, verify"
            )),
        }
    }
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Repo Index Harvester CLI
#[derive(Parser, Debug)]
#[command(name = "repo-index-harvester")]
#[command(about = "Harvest GitHub repository search results into gzip NDJSON blocks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Resume mode: on, off, reset, or verify
    #[arg(long, global = true, default_value = "off")]
    pub resume: ResumeMode,

    /// Checkpoint directory (default: `<output-dir>.resume`)
    #[arg(long, global = true)]
    pub resume_dir: Option<PathBuf>,

    /// Attempts per page request before the run is aborted (range: 1-50)
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_MAX_RETRIES,
        value_parser = clap::value_parser!(u32).range(1..=MAX_RETRIES_LIMIT)
    )]
    pub max_retries: u32,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Harvest a language's repositories over a date range
    Harvest(HarvestArgs),
}

/// Harvest command arguments
#[derive(Parser, Debug, Clone)]
pub struct HarvestArgs {
    /// Language qualifier of the search query
    #[arg(long = "lang", alias = "language", default_value = "coq")]
    pub language: String,

    /// Results per page (1-100)
    #[arg(
        long,
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_PAGE_SIZE))
    )]
    pub per_page: u32,

    /// Request budget per minute
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_REQUESTS_PER_MINUTE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub req_per_min: u32,

    /// Records per output block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = parse_block_size)]
    pub block_size: usize,

    /// Window length in hours
    #[arg(
        long,
        default_value_t = DEFAULT_WINDOW_DELTA_HOURS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub time_slot_length: u32,

    /// Directory receiving block files (default: ./<lang>_repo_index)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// First cursor position (YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339)
    #[arg(long, default_value = "2020-01-01T00:00:00")]
    pub start_date: String,

    /// End of the range (YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or RFC 3339)
    #[arg(long, default_value = "2021-01-01T00:00:00")]
    pub end_date: String,

    /// API root
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Personal access token sent as a bearer token
    #[arg(long)]
    pub token: Option<String>,
}

fn parse_block_size(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;
    if value == 0 {
        return Err("block size must be at least 1".to_string());
    }
    Ok(value)
}

impl HarvestArgs {
    /// Output directory, defaulting to `./<lang>_repo_index`
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}_repo_index", self.language)))
    }

    /// Build the harvest configuration from the arguments
    pub fn to_config(&self, max_retries: u32) -> Result<HarvestConfig, CliError> {
        let start = parse_datetime(&self.start_date)
            .map_err(|e| CliError::InvalidArgument(format!("Invalid start date: {e}")))?;
        let end = parse_datetime(&self.end_date)
            .map_err(|e| CliError::InvalidArgument(format!("Invalid end date: {e}")))?;

        let config = HarvestConfig::builder(self.language.clone(), self.output_dir())
            .page_size(self.per_page)
            .max_requests_per_minute(self.req_per_min)
            .block_size(self.block_size)
            .window_delta_hours(self.time_slot_length)
            .max_retries(max_retries)
            .date_range(start, end)
            .build();
        config.validate().map_err(CliError::ConfigurationError)?;
        Ok(config)
    }

    /// Run the harvest and print its summary
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<HarvestSummary, CliError> {
        let config = self.to_config(cli.max_retries)?;

        let resume_dir = cli
            .resume_dir
            .clone()
            .unwrap_or_else(|| config.default_resume_dir());
        match cli.resume {
            ResumeMode::Reset => handle_resume_reset(&resume_dir)?,
            ResumeMode::Verify => handle_resume_verify(&resume_dir, &config)?,
            ResumeMode::On | ResumeMode::Off => {}
        }

        let source = GithubSearchClient::new(config.language.clone(), config.page_size)?
            .with_base_url(self.base_url.clone())
            .with_token(self.token.clone());

        info!(
            language = %config.language,
            page_size = config.page_size,
            req_per_min = config.max_requests_per_minute,
            block_size = config.block_size,
            window_hours = config.window_delta_hours,
            output_dir = %config.output_dir.display(),
            resume = ?cli.resume,
            "Harvest configured"
        );

        let orchestrator = HarvestOrchestrator::new(config.clone(), source)?
            .with_resume(cli.resume.is_enabled().then_some(resume_dir))
            .with_shutdown(Some(shutdown));
        let result = orchestrator.run().await;

        match cli.output_format {
            OutputFormat::Json => println!("{}", render_json(&config, &result)?),
            OutputFormat::Human => output_human(&config, &result),
        }

        result.map_err(CliError::HarvestError)
    }
}

/// Handle Reset mode: delete the checkpoint. Block files are left alone.
fn handle_resume_reset(resume_dir: &Path) -> Result<(), CliError> {
    let path = HarvestCheckpoint::path_in(resume_dir);
    if path.exists() {
        info!(path = %path.display(), "Reset mode: deleting existing checkpoint");
    }
    HarvestCheckpoint::remove(&path)?;
    Ok(())
}

/// Handle Verify mode: check checkpoint integrity
fn handle_resume_verify(resume_dir: &Path, config: &HarvestConfig) -> Result<(), CliError> {
    let path = HarvestCheckpoint::path_in(resume_dir);
    if !path.exists() {
        info!("Verify mode: no checkpoint found, nothing to verify");
        return Ok(());
    }

    match HarvestCheckpoint::load(&path) {
        Ok(checkpoint) => {
            if !checkpoint.matches(config) {
                warn!(
                    path = %path.display(),
                    "Verify: checkpoint is valid but belongs to a different harvest and will be ignored"
                );
            }
            info!(
                path = %path.display(),
                cursor = %checkpoint.cursor().to_rfc3339(),
                next_block_id = checkpoint.next_block_id(),
                "Verify passed"
            );
            Ok(())
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Invalid checkpoint");
            Err(CliError::InvalidArgument(format!(
                "Verify failed: {e}. Use --resume reset to clear."
            )))
        }
    }
}

/// Result as a single JSON line
fn render_json(
    config: &HarvestConfig,
    result: &Result<HarvestSummary, HarvestError>,
) -> Result<String, CliError> {
    let output = match result {
        Ok(summary) => serde_json::json!({
            "success": true,
            "language": config.language,
            "output_dir": config.output_dir.display().to_string(),
            "summary": summary,
        }),
        Err(e) => serde_json::json!({
            "success": false,
            "status": HarvestStatus::from_error(e).as_str(),
            "language": config.language,
            "output_dir": config.output_dir.display().to_string(),
            "error": e.to_string(),
        }),
    };
    Ok(serde_json::to_string(&output)?)
}

fn output_human(config: &HarvestConfig, result: &Result<HarvestSummary, HarvestError>) {
    match result {
        Ok(summary) => {
            println!("\nHarvest completed successfully!");
            println!("Language: {}", config.language);
            println!("Output: {}", config.output_dir.display());
            if let Some(cursor) = summary.resumed_from {
                println!("Resumed from: {}", cursor.to_rfc3339());
            }
            println!(
                "Windows: {} (of {})",
                summary.windows_processed, summary.windows_total
            );
            println!("Pages fetched: {}", summary.pages_fetched);
            println!("Records harvested: {}", summary.records_harvested);
            println!("Blocks written: {}", summary.blocks_written);
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("\nHarvest interrupted.");
            eprintln!("Re-run with --resume on to continue from the last completed window.");
        }
        Err(e) => {
            eprintln!("\nHarvest failed!");
            eprintln!("Error: {e}");
        }
    }
}
