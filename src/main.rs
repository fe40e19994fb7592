use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siteaudit::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "siteaudit",
    version,
    about = "Distributed web page auditor with pluggable facters and validators",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Review one page in this process, with in-memory coordination
    Review {
        /// Page URL
        url: String,

        /// Write the review as JSON into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the review as JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Work through URLs as one worker of a Redis-coordinated fleet
    Work {
        /// Worker identifier, unique within the fleet
        #[arg(short, long)]
        worker_id: String,

        /// Write reviews as JSON into this directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// URLs assigned to this worker
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// List fact and violation definitions of the configured plugins
    Definitions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = siteaudit::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    tracing::info!("siteaudit starting");

    match cli.command {
        Commands::Review { url, output, json } => {
            tracing::info!(url = %url, output = ?output, "Starting review command");
            commands::review(config, url, output, json).await?;
        }

        Commands::Work {
            worker_id,
            output,
            urls,
        } => {
            tracing::info!(
                worker_id = %worker_id,
                urls = urls.len(),
                output = ?output,
                "Starting work command"
            );
            commands::work(config, worker_id, urls, output).await?;
        }

        Commands::Definitions => {
            commands::definitions(&config)?;
        }
    }

    tracing::info!("siteaudit completed successfully");
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("siteaudit=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("siteaudit={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
