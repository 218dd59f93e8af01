//! In-memory registry of live jobs.
//!
//! Each registered job lives in a [`JobCell`]: the job itself behind a short
//! critical-section mutex, the per-job in-flight flag, the stop signal for its
//! timer task and a status channel for waiters. The cursor only moves through
//! [`JobCell::claim`], which refuses to advance once the job has left
//! `running`, so a cancelled job's cursor is frozen as soon as `cancel`
//! returns.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;

use crate::job::{Delivery, DistributionJob, JobStatus};
use crate::metrics::JOBS_FINISHED;

/// State at the start of a tick.
#[derive(Debug)]
pub(crate) enum RoundStart {
    /// The job is no longer running.
    NotRunning,
    /// Nothing left to send; the job was just marked completed.
    Exhausted { cursor: usize },
    /// A round can be delivered starting at `cursor`.
    Ready {
        cursor: usize,
        targets: Vec<String>,
        lines_per_tick: usize,
    },
}

/// Live state of one registered job.
pub(crate) struct JobCell {
    id: String,
    job: Mutex<DistributionJob>,
    in_flight: AtomicBool,
    persist_lock: Mutex<()>,
    stop: Notify,
    status_tx: watch::Sender<JobStatus>,
}

/// Clears the in-flight flag when the tick finishes.
pub(crate) struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl JobCell {
    pub(crate) fn new(job: DistributionJob) -> Self {
        let (status_tx, _) = watch::channel(job.status);
        Self {
            id: job.id.clone(),
            job: Mutex::new(job),
            in_flight: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
            stop: Notify::new(),
            status_tx,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn lock(&self) -> MutexGuard<'_, DistributionJob> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> DistributionJob {
        self.lock().clone()
    }

    pub(crate) fn owner_id(&self) -> String {
        self.lock().owner_id.clone()
    }

    pub(crate) fn interval_secs(&self) -> u32 {
        self.lock().interval_secs
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> JobStatus {
        self.lock().status
    }

    /// Mark a tick as in flight. `None` if another tick already is.
    pub(crate) fn try_begin_tick(&self) -> Option<InFlightGuard<'_>> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                flag: &self.in_flight,
            })
    }

    pub(crate) fn begin_round(&self) -> RoundStart {
        let mut job = self.lock();
        if job.status != JobStatus::Running {
            return RoundStart::NotRunning;
        }
        if job.is_exhausted() {
            let cursor = job.next_index;
            self.finish(&mut job, JobStatus::Completed);
            return RoundStart::Exhausted { cursor };
        }
        RoundStart::Ready {
            cursor: job.next_index,
            targets: job.targets.clone(),
            lines_per_tick: job.lines_per_tick.get(),
        }
    }

    /// Advance the cursor by up to `max` lines and return the claimed range.
    ///
    /// `None` once the job is no longer running; an empty range when every
    /// line has been claimed.
    pub(crate) fn claim(&self, max: usize) -> Option<Range<usize>> {
        let mut job = self.lock();
        if job.status != JobStatus::Running {
            return None;
        }
        let start = job.next_index;
        let end = (start + max).min(job.total_lines());
        job.next_index = end;
        Some(start..end)
    }

    /// Build deliveries for already-claimed lines.
    pub(crate) fn deliveries(&self, range: Range<usize>) -> Vec<Delivery> {
        let job = self.lock();
        range.map(|index| Delivery::new(&job, index)).collect()
    }

    /// Flip a running job whose cursor reached the end to completed.
    pub(crate) fn complete_if_exhausted(&self) -> bool {
        let mut job = self.lock();
        if job.status == JobStatus::Running && job.is_exhausted() {
            self.finish(&mut job, JobStatus::Completed);
            return true;
        }
        false
    }

    /// Flip a running job to cancelled. Returns false if it was already terminal.
    pub(crate) fn cancel(&self) -> bool {
        let mut job = self.lock();
        if job.status != JobStatus::Running {
            return false;
        }
        self.finish(&mut job, JobStatus::Cancelled);
        true
    }

    fn finish(&self, job: &mut DistributionJob, status: JobStatus) {
        job.status = status;
        JOBS_FINISHED.with_label_values(&[status.as_str()]).inc();
        self.status_tx.send_replace(status);
    }

    /// Serializes durable writes for this job.
    pub(crate) fn persist_guard(&self) -> MutexGuard<'_, ()> {
        self.persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the timer task to stop.
    pub(crate) fn request_stop(&self) {
        self.stop.notify_one();
    }

    /// Resolves once [`JobCell::request_stop`] has been called.
    pub(crate) async fn stopped(&self) {
        self.stop.notified().await;
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }
}

struct JobEntry {
    cell: Arc<JobCell>,
    timer: Option<JoinHandle<()>>,
}

/// Result of cancelling a registered job.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    /// Job state right after the cancel.
    pub job: DistributionJob,
    /// False when the job had already finished and nothing changed.
    pub changed: bool,
}

/// In-memory registry mapping job IDs to their live state and timer.
///
/// Ownership filtering is left to callers.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job and its timer. Returns false if the ID is already taken.
    pub(crate) async fn register(&self, cell: Arc<JobCell>, timer: Option<JoinHandle<()>>) -> bool {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(cell.id()) {
            return false;
        }
        jobs.insert(cell.id().to_string(), JobEntry { cell, timer });
        true
    }

    pub(crate) async fn cell(&self, id: &str) -> Option<Arc<JobCell>> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.cell))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.read().await.contains_key(id)
    }

    /// Snapshot of a registered job.
    pub async fn lookup(&self, id: &str) -> Option<DistributionJob> {
        self.jobs.read().await.get(id).map(|entry| entry.cell.snapshot())
    }

    /// Snapshots of every job owned by `owner_id`, oldest first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Vec<DistributionJob> {
        let mut jobs: Vec<DistributionJob> = self
            .jobs
            .read()
            .await
            .values()
            .map(|entry| entry.cell.snapshot())
            .filter(|job| job.owner_id == owner_id)
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    /// Cancel a job: flip its status and detach its timer.
    ///
    /// Returns `None` for unknown IDs. Cancelling a finished job changes nothing.
    pub async fn cancel(&self, id: &str) -> Option<CancelOutcome> {
        let mut jobs = self.jobs.write().await;
        let entry = jobs.get_mut(id)?;

        let changed = entry.cell.cancel();
        if changed {
            entry.cell.request_stop();
            // Dropping the handle detaches the task; it exits on the stop signal.
            entry.timer.take();
        }

        Some(CancelOutcome {
            job: entry.cell.snapshot(),
            changed,
        })
    }

    /// Take every timer handle, leaving the jobs registered.
    pub(crate) async fn take_timers(&self) -> Vec<JoinHandle<()>> {
        self.jobs
            .write()
            .await
            .values_mut()
            .filter_map(|entry| entry.timer.take())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::CreateJobRequest;

    fn job(owner: &str, text: &str, lines_per_tick: i64, targets: &[&str]) -> DistributionJob {
        let spec = CreateJobRequest {
            text: text.to_string(),
            interval_secs: 1,
            lines_per_tick,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
        .validate()
        .unwrap();
        DistributionJob::new(owner, spec)
    }

    #[test]
    fn test_claim_advances_cursor() {
        let cell = JobCell::new(job("admin", "a\nb\nc\nd\ne", 3, &["u1"]));
        assert_eq!(cell.claim(3), Some(0..3));
        assert_eq!(cell.claim(3), Some(3..5));
        assert_eq!(cell.claim(3), Some(5..5));
        assert_eq!(cell.snapshot().next_index, 5);
    }

    #[test]
    fn test_claim_refused_after_cancel() {
        let cell = JobCell::new(job("admin", "a\nb\nc", 1, &["u1"]));
        assert_eq!(cell.claim(1), Some(0..1));
        assert!(cell.cancel());
        assert_eq!(cell.claim(1), None);
        assert_eq!(cell.snapshot().next_index, 1);
        assert!(!cell.cancel());
    }

    #[test]
    fn test_deliveries_for_claimed_lines() {
        let cell = JobCell::new(job("admin", "a\nb\nc", 3, &["u1"]));
        let range = cell.claim(2).unwrap();
        let deliveries = cell.deliveries(range);
        let texts: Vec<&str> = deliveries.iter().map(|d| d.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(deliveries[1].line_number, 2);
    }

    #[test]
    fn test_begin_round_on_exhausted_job_completes_it() {
        let cell = JobCell::new(job("admin", "only", 1, &["u1"]));
        cell.claim(1);
        assert!(matches!(cell.begin_round(), RoundStart::Exhausted { cursor: 1 }));
        assert_eq!(cell.status(), JobStatus::Completed);
        assert!(matches!(cell.begin_round(), RoundStart::NotRunning));
    }

    #[test]
    fn test_complete_if_exhausted() {
        let cell = JobCell::new(job("admin", "a\nb", 1, &["u1"]));
        cell.claim(1);
        assert!(!cell.complete_if_exhausted());
        cell.claim(1);
        assert!(cell.complete_if_exhausted());
        assert_eq!(cell.status(), JobStatus::Completed);
        assert!(!cell.cancel());
    }

    #[test]
    fn test_in_flight_guard() {
        let cell = JobCell::new(job("admin", "a", 1, &["u1"]));
        let guard = cell.try_begin_tick();
        assert!(guard.is_some());
        assert!(cell.try_begin_tick().is_none());
        drop(guard);
        assert!(cell.try_begin_tick().is_some());
    }

    #[tokio::test]
    async fn test_status_channel_reports_terminal_state() {
        let cell = JobCell::new(job("admin", "a", 1, &["u1"]));
        let mut rx = cell.subscribe();
        assert_eq!(*rx.borrow(), JobStatus::Running);
        cell.cancel();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let store = JobStore::new();
        let job = job("admin", "a\nb", 1, &["u1"]);
        let id = job.id.clone();

        assert!(store.register(Arc::new(JobCell::new(job.clone())), None).await);
        assert!(!store.register(Arc::new(JobCell::new(job)), None).await);

        assert!(store.contains(&id).await);
        assert_eq!(store.lookup(&id).await.unwrap().id, id);
        assert!(store.lookup("job_missing").await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let store = JobStore::new();
        for owner in ["alice", "bob", "alice"] {
            store
                .register(Arc::new(JobCell::new(job(owner, "x", 1, &["u1"]))), None)
                .await;
        }

        let alice = store.list_by_owner("alice").await;
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|j| j.owner_id == "alice"));
        assert!(alice[0].created_at <= alice[1].created_at);
        assert!(store.list_by_owner("carol").await.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_detaches_timer() {
        let store = JobStore::new();
        let job = job("admin", "a\nb", 1, &["u1"]);
        let id = job.id.clone();
        let cell = Arc::new(JobCell::new(job));

        let waiter = Arc::clone(&cell);
        let timer = tokio::spawn(async move { waiter.stopped().await });
        store.register(cell, Some(timer)).await;

        let outcome = store.cancel(&id).await.unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.job.status, JobStatus::Cancelled);
        assert!(store.take_timers().await.is_empty());

        let again = store.cancel(&id).await.unwrap();
        assert!(!again.changed);
        assert!(store.cancel("job_missing").await.is_none());
    }
}
