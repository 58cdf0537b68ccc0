//! jobq - a durable background job queue for shell commands.
//!
//! Provides commands for enqueueing jobs, running workers, inspecting the
//! queue and its dead letter queue, and managing configuration.

mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use jobq_core::config::QueueConfig;
use jobq_core::jobs::{JobQueue, JobStore};

use commands::{config, dlq, job, worker};
use output::OutputFormat;

/// jobq - Durable Background Job Queue
#[derive(Parser)]
#[command(
    name = "jobq",
    version,
    about = "jobq - Durable background job queue for shell commands",
    long_about = "Enqueue shell commands as durable jobs, run a pool of workers \
                  against them, and manage retries and the dead letter queue.",
    propagate_version = true
)]
pub struct Cli {
    /// Storage directory for the job, lock, and config documents
    #[arg(long, global = true, env = "JOBQ_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enqueue a new job
    Enqueue(job::EnqueueArgs),

    /// List jobs, newest first
    List(job::ListArgs),

    /// Show per-state job counts
    Status,

    /// Worker management operations
    #[command(subcommand)]
    Worker(worker::WorkerCommands),

    /// Dead letter queue operations
    #[command(subcommand)]
    Dlq(dlq::DlqCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

/// Shared handles threaded through every command.
pub struct AppContext {
    pub store: Arc<JobStore>,
    pub queue: Arc<JobQueue>,
    pub config: QueueConfig,
}

/// Resolve the storage root: flag/env first, then the platform data
/// directory, then a local fallback.
fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| dirs::data_dir().map(|d| d.join("jobq")))
        .unwrap_or_else(|| PathBuf::from("jobq_data"))
}

fn init_logging(config: &QueueConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let data_dir = resolve_data_dir(cli.data_dir.clone());
    let store = Arc::new(
        JobStore::open(&data_dir)
            .await
            .with_context(|| format!("failed to open job store at {}", data_dir.display()))?,
    );
    let config = QueueConfig::load(&store)
        .await
        .context("failed to load configuration")?;
    init_logging(&config);

    let ctx = AppContext {
        queue: Arc::new(JobQueue::new(store.clone())),
        store,
        config,
    };
    let format = cli.output;

    let result = match cli.command {
        Commands::Enqueue(args) => job::enqueue(args, &ctx, format).await,
        Commands::List(args) => job::list(args, &ctx, format).await,
        Commands::Status => job::status(&ctx, format).await,
        Commands::Worker(cmd) => worker::execute(cmd, &ctx, format).await,
        Commands::Dlq(cmd) => dlq::execute(cmd, &ctx, format).await,
        Commands::Config(cmd) => config::execute(cmd, &ctx, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
