//! Best-effort mirroring of job progress into the durable store.
//!
//! Failures are logged and counted but never propagated: the live registry
//! stays authoritative and distribution continues regardless.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use super::registry::JobCell;
use crate::job::{DistributionJob, PersistError, ProgressStore, QueueItem};
use crate::metrics::PERSIST_FAILURES;

/// Writes job progress to a [`ProgressStore`], swallowing failures.
#[derive(Clone)]
pub struct ProgressPersister {
    store: Arc<dyn ProgressStore>,
}

impl ProgressPersister {
    pub fn new(store: Arc<dyn ProgressStore>) -> Self {
        Self { store }
    }

    /// Store a newly created job and its queue. Returns false if the write failed.
    pub fn record_created(&self, job: &DistributionJob, queue: &[QueueItem]) -> bool {
        self.swallow("insert_job", &job.id, self.store.insert_job(job, queue))
            .is_some()
    }

    /// Mirror a job snapshot whose cursor was at `before` on the previous call.
    ///
    /// Upserts the job row, then marks queue items sent up to the current
    /// cursor if it has advanced.
    pub fn persist(&self, job: &DistributionJob, before: usize) {
        self.swallow("upsert_progress", &job.id, self.store.upsert_progress(job));

        let after = job.next_index;
        if after > 0 && after > before {
            if let Some(updated) = self.swallow(
                "mark_sent",
                &job.id,
                self.store.mark_sent_through(&job.id, after, Utc::now()),
            ) {
                debug!(job_id = %job.id, through = after, updated, "Marked queue items sent");
            }
        }
    }

    /// Snapshot a live job and mirror it, serialized with other writes for
    /// the same job so the newest state is always written last.
    pub(crate) fn mirror(&self, cell: &JobCell, before: usize) {
        let _guard = cell.persist_guard();
        let job = cell.snapshot();
        self.persist(&job, before);
    }

    fn swallow<T>(
        &self,
        operation: &'static str,
        job_id: &str,
        result: Result<T, PersistError>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(job_id, operation, error = %e, "Failed to persist job progress");
                PERSIST_FAILURES.with_label_values(&[operation]).inc();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, JobStatus, LineStatus, SqliteProgressStore};
    use crate::queue::build_queue;
    use crate::testing::MockProgressStore;

    fn job(text: &str) -> DistributionJob {
        let spec = CreateJobRequest {
            text: text.to_string(),
            interval_secs: 1,
            lines_per_tick: 1,
            target_ids: vec!["u1".to_string()],
        }
        .validate()
        .unwrap();
        DistributionJob::new("admin", spec)
    }

    fn seeded(text: &str) -> (Arc<SqliteProgressStore>, ProgressPersister, DistributionJob) {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        let persister = ProgressPersister::new(store.clone());
        let job = job(text);
        let queue = build_queue(&job.targets, job.lines_per_tick, &job.text_lines);
        assert!(persister.record_created(&job, &queue));
        (store, persister, job)
    }

    #[test]
    fn test_persist_marks_advanced_lines() {
        let (store, persister, mut job) = seeded("a\nb\nc");

        job.next_index = 2;
        persister.persist(&job, 0);

        let stored = store.load_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.next_index, 2);
        let queue = store.load_queue(&job.id).unwrap().unwrap();
        let statuses: Vec<LineStatus> = queue.iter().map(|i| i.status).collect();
        assert_eq!(
            statuses,
            vec![LineStatus::Sent, LineStatus::Sent, LineStatus::Pending]
        );
    }

    #[test]
    fn test_persist_without_advance_only_updates_row() {
        let (store, persister, mut job) = seeded("a\nb");

        job.status = JobStatus::Cancelled;
        persister.persist(&job, 0);

        let stored = store.load_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        let queue = store.load_queue(&job.id).unwrap().unwrap();
        assert!(queue.iter().all(|i| i.status == LineStatus::Pending));
    }

    #[test]
    fn test_failures_are_swallowed() {
        let store = Arc::new(MockProgressStore::new());
        store.set_failing(true);
        let persister = ProgressPersister::new(store.clone());
        let mut job = job("a\nb");

        assert!(!persister.record_created(&job, &[]));
        job.next_index = 1;
        persister.persist(&job, 0);

        store.set_failing(false);
        assert!(persister.record_created(&job, &[]));
    }
}
