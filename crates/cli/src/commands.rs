//! Command implementations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tokio::signal;
use tracing::{info, warn};

use linecaster_core::{CreateJobRequest, Distributor, JobStatus};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// File whose lines are distributed
    #[arg(long)]
    pub text_file: PathBuf,

    /// Seconds between ticks (1-300)
    #[arg(long)]
    pub interval: i64,

    /// Lines per recipient per tick (1, 3, 5, 7, 10, 12 or 15)
    #[arg(long, default_value_t = 1)]
    pub lines: i64,

    /// Recipient, in rotation order; repeat for several
    #[arg(long = "target", required = true)]
    pub targets: Vec<String>,

    /// Owner of the job (defaults to distributor.default_owner)
    #[arg(long)]
    pub owner: Option<String>,
}

/// Create a job and wait for it to finish. Ctrl-C cancels it.
pub async fn run(distributor: &Distributor, owner: &str, args: RunArgs) -> Result<()> {
    let text = tokio::fs::read_to_string(&args.text_file)
        .await
        .with_context(|| format!("Failed to read {:?}", args.text_file))?;

    let job = distributor
        .create_job(
            owner,
            CreateJobRequest {
                text,
                interval_secs: args.interval,
                lines_per_tick: args.lines,
                target_ids: args.targets,
            },
        )
        .await
        .context("Failed to create job")?;

    let finished = tokio::select! {
        finished = distributor.wait_for_terminal(&job.id) => finished,
        result = shutdown_signal() => {
            result.context("Failed to listen for shutdown signal")?;
            info!(job_id = %job.id, "Interrupted, cancelling job");
            Some(distributor.cancel_job(owner, &job.id).await?)
        }
    };

    let finished = finished.context("Job disappeared from the registry")?;
    info!(
        job_id = %finished.id,
        status = %finished.status,
        sent = finished.next_index,
        total_lines = finished.total_lines(),
        "Job finished"
    );
    Ok(())
}

/// Print an owner's durable history.
pub async fn history(distributor: &Distributor, owner: &str) -> Result<()> {
    let history = distributor
        .list_queue_history(owner)
        .await
        .context("Failed to list queue history")?;
    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

/// Resume running jobs and wait for them. Ctrl-C stops the timers but
/// leaves the jobs running in the database.
pub async fn resume(distributor: &Distributor) -> Result<()> {
    let jobs = distributor
        .recover_running_jobs()
        .await
        .context("Failed to recover running jobs")?;
    if jobs.is_empty() {
        info!("No running jobs to resume");
        return Ok(());
    }

    let wait_all = async {
        for job in &jobs {
            if let Some(finished) = distributor.wait_for_terminal(&job.id).await {
                info!(job_id = %finished.id, status = %finished.status, "Resumed job finished");
            }
        }
    };

    tokio::select! {
        _ = wait_all => {}
        result = shutdown_signal() => {
            result.context("Failed to listen for shutdown signal")?;
            distributor.shutdown().await;
        }
    }

    let mut still_running = 0;
    for job in &jobs {
        if let Some(live) = distributor.jobs().lookup(&job.id).await {
            if live.status == JobStatus::Running {
                still_running += 1;
            }
        }
    }
    if still_running > 0 {
        warn!(still_running, "Interrupted; jobs stay running for the next resume");
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}
