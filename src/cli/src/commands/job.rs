//! Job management commands.
//!
//! Provides enqueue, list, and status operations for the queue.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use jobq_core::jobs::{Job, JobPolicy, JobState};

use crate::output::{self, OutputFormat};
use crate::AppContext;

#[derive(Args)]
pub struct EnqueueArgs {
    /// Shell command to execute
    pub command: String,

    /// Maximum retry attempts before the job goes to the dead letter queue
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Exponential backoff base in seconds
    #[arg(long)]
    pub backoff_base: Option<u32>,

    /// Per-attempt execution timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by state (pending, processing, completed, failed, dead)
    #[arg(short, long)]
    pub state: Option<JobState>,

    /// Maximum number of results
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

#[derive(Debug, Serialize, Tabled)]
struct JobRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Command")]
    command: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Attempts")]
    attempts: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

impl JobRow {
    fn from_job(job: &Job) -> Self {
        Self {
            id: job.id.to_string()[..8].to_string(),
            command: output::ellipsize(&job.command, 30),
            state: job.state.to_string(),
            attempts: format!("{}/{}", job.attempts, job.max_retries),
            created_at: job.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

pub async fn enqueue(args: EnqueueArgs, ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let defaults = ctx.config.job_policy();
    let policy = JobPolicy {
        max_retries: args.max_retries.unwrap_or(defaults.max_retries),
        backoff_base: args.backoff_base.unwrap_or(defaults.backoff_base),
        timeout_secs: args.timeout.unwrap_or(defaults.timeout_secs),
    };

    let job = ctx
        .queue
        .enqueue(args.command, policy)
        .await
        .context("failed to enqueue job")?;

    match format {
        OutputFormat::Table => {
            output::print_success("Job enqueued");
            output::print_detail("ID", &job.id.to_string());
            output::print_detail("Command", &job.command);
            output::print_detail("Max Retries", &job.max_retries.to_string());
            output::print_detail("Timeout", &format!("{}s", job.timeout_secs));
        }
        _ => output::print_item(&job, format),
    }

    Ok(())
}

pub async fn list(args: ListArgs, ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let jobs = ctx
        .queue
        .list_jobs(args.state, args.limit)
        .await
        .context("failed to list jobs")?;

    match format {
        OutputFormat::Table => {
            if jobs.is_empty() {
                output::print_info("No jobs found");
                return Ok(());
            }
            let rows: Vec<JobRow> = jobs.iter().map(JobRow::from_job).collect();
            output::print_list(&rows, format);
        }
        _ => output::print_item(&jobs, format),
    }

    Ok(())
}

pub async fn status(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let stats = ctx
        .queue
        .stats()
        .await
        .context("failed to read queue stats")?;

    match format {
        OutputFormat::Table => {
            output::print_header("Queue Status");
            output::print_detail("Pending", &stats.pending.to_string());
            output::print_detail("Processing", &stats.processing.to_string());
            output::print_detail("Completed", &stats.completed.to_string());
            output::print_detail("Failed", &stats.failed.to_string());
            output::print_detail("Dead", &stats.dead.to_string());
            output::print_detail("Total", &stats.total.to_string());
        }
        _ => output::print_item(&stats, format),
    }

    Ok(())
}
