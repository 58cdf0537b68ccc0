//! Dead letter queue commands.
//!
//! Inspect permanently failed jobs and send them back for a fresh run.

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use jobq_core::jobs::{Job, JobId};

use crate::output::{self, OutputFormat};
use crate::AppContext;

#[derive(Subcommand)]
pub enum DlqCommands {
    /// List jobs in the dead letter queue
    List,

    /// Requeue a dead job with its attempt counter reset
    Retry {
        /// Job ID
        job_id: JobId,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct DlqRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

impl DlqRow {
    fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.to_string()[..8].to_string(),
            command: output::ellipsize(&job.command, 40),
            attempts: job.attempts,
            last_error: output::ellipsize(job.last_error.as_deref().unwrap_or("-"), 50),
        }
    }
}

pub async fn execute(cmd: DlqCommands, ctx: &AppContext, format: OutputFormat) -> Result<()> {
    match cmd {
        DlqCommands::List => {
            let jobs = ctx
                .queue
                .dlq_jobs()
                .await
                .context("failed to list dead letter queue")?;

            match format {
                OutputFormat::Table => {
                    if jobs.is_empty() {
                        output::print_info("Dead letter queue is empty");
                        return Ok(());
                    }
                    let rows: Vec<DlqRow> = jobs.iter().map(DlqRow::from_job).collect();
                    output::print_list(&rows, format);
                }
                _ => output::print_item(&jobs, format),
            }
        }

        DlqCommands::Retry { job_id } => {
            let retried = ctx
                .queue
                .retry_dlq_job(&job_id)
                .await
                .context("failed to retry job")?;

            if retried {
                output::print_success(&format!("Job {} requeued for retry", job_id));
            } else {
                output::print_error(&format!("Job {} is not in the dead letter queue", job_id));
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
