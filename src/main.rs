//! Main entry point for the repo-index-harvester CLI

use clap::Parser;
use repo_index_harvester::cli::{Cli, Commands};
use repo_index_harvester::metrics::init_metrics;
use repo_index_harvester::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("repo_index_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
    }

    let shutdown = ShutdownCoordinator::shared();
    shutdown::install_ctrl_c_handler(shutdown.clone());

    match cli.command {
        Commands::Harvest(ref args) => {
            args.execute(&cli, shutdown).await?;
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
