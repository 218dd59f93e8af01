//! Types for the distribution engine.

use serde::Serialize;
use thiserror::Error;

use crate::job::{DistributionJob, PersistError, QueueItem, ValidationError};

/// Errors returned by distributor operations.
#[derive(Debug, Error)]
pub enum DistributorError {
    /// Job parameters were rejected; nothing was persisted or scheduled.
    #[error("invalid job parameters: {0}")]
    Validation(#[from] ValidationError),

    /// Job is unknown or owned by someone else.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Durable store read failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),
}

/// Live job merged with its persisted queue.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetails {
    #[serde(flatten)]
    pub job: DistributionJob,
    /// `None` when the durable queue could not be read.
    pub queue: Option<Vec<QueueItem>>,
}

/// What a single timer firing did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A batch was delivered and the job is still running.
    Delivered { lines: usize },
    /// The cursor reached the end; the job is now completed.
    Completed { lines: usize },
    /// Another tick for the same job was still in flight.
    SkippedInFlight,
    /// The job was no longer running.
    Stopped,
}

impl TickOutcome {
    /// Whether the job's timer should stop after this tick.
    pub fn is_final(&self) -> bool {
        matches!(self, TickOutcome::Completed { .. } | TickOutcome::Stopped)
    }

    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::Delivered { .. } => "delivered",
            TickOutcome::Completed { .. } => "completed",
            TickOutcome::SkippedInFlight => "skipped_in_flight",
            TickOutcome::Stopped => "stopped",
        }
    }
}
