//! Worker management commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use jobq_core::jobs::{WorkerConfig, WorkerPool, WorkerSnapshot, DEFAULT_LOCK_MAX_AGE};

use crate::output::{self, OutputFormat};
use crate::AppContext;

#[derive(Subcommand)]
pub enum WorkerCommands {
    /// Run a pool of workers until interrupted
    Run {
        /// Number of workers to start
        #[arg(short, long)]
        count: Option<usize>,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct WorkerRow {
    #[tabled(rename = "Worker")]
    id: String,
    #[tabled(rename = "Processed")]
    processed: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
}

impl WorkerRow {
    fn from_snapshot(snap: &WorkerSnapshot) -> Self {
        Self {
            id: snap.worker_id.clone(),
            processed: snap.processed,
            failed: snap.failed,
        }
    }
}

pub async fn execute(cmd: WorkerCommands, ctx: &AppContext, format: OutputFormat) -> Result<()> {
    match cmd {
        WorkerCommands::Run { count } => {
            let count = count.unwrap_or(ctx.config.worker_count).max(1);

            // Orphaned locks from a crashed run would otherwise pin jobs
            // in processing forever.
            let freed = ctx
                .queue
                .cleanup_orphaned_locks(DEFAULT_LOCK_MAX_AGE)
                .await
                .context("failed to sweep orphaned locks")?;
            if freed > 0 {
                tracing::info!(freed, "requeued orphaned jobs");
            }

            output::print_info(&format!(
                "Starting {} worker(s), press Ctrl-C to stop",
                count
            ));

            let mut pool = WorkerPool::new(ctx.queue.clone(), WorkerConfig::default());
            pool.start(count);

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            output::print_info("Shutting down workers...");

            let snapshots = pool.shutdown().await;

            match format {
                OutputFormat::Table => {
                    let rows: Vec<WorkerRow> =
                        snapshots.iter().map(WorkerRow::from_snapshot).collect();
                    output::print_list(&rows, format);
                }
                _ => output::print_item(&snapshots, format),
            }
        }
    }

    Ok(())
}
