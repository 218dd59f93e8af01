//! Mock progress store for testing.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::job::{
    DistributionJob, PersistError, ProgressStore, QueueHistoryEntry, QueueItem,
    SqliteProgressStore,
};

/// Progress store backed by in-memory SQLite with switchable failures.
///
/// Provides controllable behavior for testing:
/// - Fail writes (insert, upsert, mark sent) on demand
/// - Fail reads (queue, job, history) on demand
/// - Record the operations that were attempted
pub struct MockProgressStore {
    inner: SqliteProgressStore,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    operations: Mutex<Vec<&'static str>>,
}

impl MockProgressStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteProgressStore::in_memory().expect("in-memory SQLite store"),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            operations: Mutex::new(Vec::new()),
        }
    }

    /// Make every operation fail or succeed.
    pub fn set_failing(&self, failing: bool) {
        self.set_fail_writes(failing);
        self.set_fail_reads(failing);
    }

    pub fn set_fail_writes(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    /// Names of the operations attempted so far, in call order.
    pub fn recorded_operations(&self) -> Vec<&'static str> {
        self.operations.lock().unwrap().clone()
    }

    /// Direct access to the backing store, bypassing failure injection.
    pub fn inner(&self) -> &SqliteProgressStore {
        &self.inner
    }

    fn write(&self, operation: &'static str) -> Result<(), PersistError> {
        self.operations.lock().unwrap().push(operation);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistError::Database(format!("{} failed (injected)", operation)));
        }
        Ok(())
    }

    fn read(&self, operation: &'static str) -> Result<(), PersistError> {
        self.operations.lock().unwrap().push(operation);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(PersistError::Database(format!("{} failed (injected)", operation)));
        }
        Ok(())
    }
}

impl Default for MockProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore for MockProgressStore {
    fn insert_job(&self, job: &DistributionJob, queue: &[QueueItem]) -> Result<(), PersistError> {
        self.write("insert_job")?;
        self.inner.insert_job(job, queue)
    }

    fn upsert_progress(&self, job: &DistributionJob) -> Result<(), PersistError> {
        self.write("upsert_progress")?;
        self.inner.upsert_progress(job)
    }

    fn mark_sent_through(
        &self,
        job_id: &str,
        through: usize,
        sent_at: DateTime<Utc>,
    ) -> Result<usize, PersistError> {
        self.write("mark_sent")?;
        self.inner.mark_sent_through(job_id, through, sent_at)
    }

    fn load_queue(&self, job_id: &str) -> Result<Option<Vec<QueueItem>>, PersistError> {
        self.read("load_queue")?;
        self.inner.load_queue(job_id)
    }

    fn load_job(&self, job_id: &str) -> Result<Option<DistributionJob>, PersistError> {
        self.read("load_job")?;
        self.inner.load_job(job_id)
    }

    fn list_history(
        &self,
        owner_id: &str,
        limit: i64,
    ) -> Result<Vec<QueueHistoryEntry>, PersistError> {
        self.read("list_history")?;
        self.inner.list_history(owner_id, limit)
    }

    fn list_running(&self, limit: i64) -> Result<Vec<DistributionJob>, PersistError> {
        self.read("list_running")?;
        self.inner.list_running(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateJobRequest;

    fn job() -> DistributionJob {
        let spec = CreateJobRequest {
            text: "a\nb".to_string(),
            interval_secs: 1,
            lines_per_tick: 1,
            target_ids: vec!["u1".to_string()],
        }
        .validate()
        .unwrap();
        DistributionJob::new("admin", spec)
    }

    #[test]
    fn test_passes_through_when_healthy() {
        let store = MockProgressStore::new();
        let job = job();
        store.insert_job(&job, &[]).unwrap();
        assert!(store.load_job(&job.id).unwrap().is_some());
        assert_eq!(store.recorded_operations(), vec!["insert_job", "load_job"]);
    }

    #[test]
    fn test_injected_write_failure() {
        let store = MockProgressStore::new();
        let job = job();
        store.set_fail_writes(true);

        assert!(matches!(
            store.insert_job(&job, &[]),
            Err(PersistError::Database(_))
        ));
        assert!(store.load_job(&job.id).unwrap().is_none());

        store.set_fail_reads(true);
        assert!(store.list_history("admin", 10).is_err());
    }
}
