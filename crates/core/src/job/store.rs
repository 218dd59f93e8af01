//! Durable progress storage trait and types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{DistributionJob, JobStatus, QueueItem};

/// Error type for durable store operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// One job's durable queue, as shown in history listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueHistoryEntry {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub queue: Vec<QueueItem>,
}

/// Trait for durable job/queue storage backends.
///
/// The live registry stays authoritative while a job runs; this store is a
/// mirror used for history queries and recovery.
pub trait ProgressStore: Send + Sync {
    /// Store a newly created job together with its precomputed queue.
    fn insert_job(&self, job: &DistributionJob, queue: &[QueueItem]) -> Result<(), PersistError>;

    /// Insert or update the job row, refreshing its cursor and status.
    fn upsert_progress(&self, job: &DistributionJob) -> Result<(), PersistError>;

    /// Mark every pending queue item with `line_number <= through` as sent.
    /// Returns the number of items updated.
    fn mark_sent_through(
        &self,
        job_id: &str,
        through: usize,
        sent_at: DateTime<Utc>,
    ) -> Result<usize, PersistError>;

    /// Load a job's queue ordered by line number, `None` if the job is unknown.
    fn load_queue(&self, job_id: &str) -> Result<Option<Vec<QueueItem>>, PersistError>;

    /// Load a job by ID.
    fn load_job(&self, job_id: &str) -> Result<Option<DistributionJob>, PersistError>;

    /// Jobs owned by `owner_id` with their queues, newest first.
    fn list_history(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<QueueHistoryEntry>, PersistError>;

    /// Jobs whose durable status is still running, oldest first.
    fn list_running(&self, limit: i64) -> Result<Vec<DistributionJob>, PersistError>;
}
