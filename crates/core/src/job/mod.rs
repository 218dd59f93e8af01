//! Distribution jobs: data model and durable storage.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteProgressStore;
pub use store::{PersistError, ProgressStore, QueueHistoryEntry};
pub use types::{
    new_id, split_lines, CreateJobRequest, Delivery, DistributionJob, JobSpec, JobStatus,
    LineStatus, LinesPerTick, QueueItem, ValidationError, MAX_INTERVAL_SECS, MIN_INTERVAL_SECS,
};
