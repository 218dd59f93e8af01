//! The distribution engine: job lifecycle operations over the live registry,
//! the per-job timers and the durable mirror.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::config::DistributorConfig;
use super::persister::ProgressPersister;
use super::registry::{JobCell, JobStore};
use super::scheduler::TickScheduler;
use super::types::{DistributorError, JobDetails};
use crate::job::{CreateJobRequest, DistributionJob, ProgressStore, QueueHistoryEntry};
use crate::metrics::JOBS_CREATED;
use crate::queue::build_queue;
use crate::recipient::Recipients;

/// Owns every live job and its timer.
///
/// Dropping the distributor closes the shutdown channel, which stops every
/// job timer.
pub struct Distributor {
    config: DistributorConfig,
    jobs: JobStore,
    store: Arc<dyn ProgressStore>,
    persister: ProgressPersister,
    scheduler: TickScheduler,
    shutdown_tx: broadcast::Sender<()>,
}

impl Distributor {
    pub fn new(
        config: DistributorConfig,
        store: Arc<dyn ProgressStore>,
        recipients: Arc<dyn Recipients>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let persister = ProgressPersister::new(Arc::clone(&store));
        let scheduler = TickScheduler::new(recipients, persister.clone());

        Self {
            config,
            jobs: JobStore::new(),
            store,
            persister,
            scheduler,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// The live job registry.
    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Validate a request, record the job and its queue, and start its timer.
    ///
    /// The durable write is best-effort; a failure there does not fail the
    /// call. The first tick fires one interval after this returns.
    pub async fn create_job(
        &self,
        owner_id: &str,
        request: CreateJobRequest,
    ) -> Result<DistributionJob, DistributorError> {
        let spec = request.validate().map_err(|e| {
            debug!(owner_id, error = %e, "Rejected job request");
            e
        })?;

        let job = DistributionJob::new(owner_id, spec);
        let queue = build_queue(&job.targets, job.lines_per_tick, &job.text_lines);
        if !self.persister.record_created(&job, &queue) {
            warn!(job_id = %job.id, "Job will run without a durable queue");
        }

        self.start(JobCell::new(job.clone())).await;
        JOBS_CREATED.inc();

        info!(
            job_id = %job.id,
            owner_id,
            lines = job.total_lines(),
            targets = job.targets.len(),
            interval_secs = job.interval_secs,
            lines_per_tick = %job.lines_per_tick,
            "Distribution job created"
        );

        Ok(job)
    }

    async fn start(&self, cell: JobCell) {
        let cell = Arc::new(cell);
        let period = self.config.tick_period(cell.interval_secs());
        let timer = self
            .scheduler
            .spawn(Arc::clone(&cell), period, self.shutdown_tx.subscribe());

        if !self.jobs.register(cell, Some(timer)).await {
            warn!("Job ID already registered, timer left detached");
        }
    }

    /// Snapshots of every live job owned by `owner_id`, oldest first.
    pub async fn list_jobs(&self, owner_id: &str) -> Vec<DistributionJob> {
        self.jobs.list_by_owner(owner_id).await
    }

    /// A live job merged with its durable queue.
    ///
    /// Jobs owned by someone else are reported as not found. If the durable
    /// queue cannot be read the job is still returned, with no queue.
    pub async fn get_job(&self, owner_id: &str, job_id: &str) -> Result<JobDetails, DistributorError> {
        let job = self
            .jobs
            .lookup(job_id)
            .await
            .filter(|job| job.owner_id == owner_id)
            .ok_or_else(|| DistributorError::NotFound(job_id.to_string()))?;

        let queue = match self.store.load_queue(job_id) {
            Ok(queue) => queue,
            Err(e) => {
                warn!(job_id, error = %e, "Failed to load job queue");
                None
            }
        };

        Ok(JobDetails { job, queue })
    }

    /// Cancel a running job and stop its timer.
    ///
    /// Once this returns no further lines of the job are sent. Cancelling a
    /// job that already finished returns it unchanged.
    pub async fn cancel_job(
        &self,
        owner_id: &str,
        job_id: &str,
    ) -> Result<DistributionJob, DistributorError> {
        let not_found = || DistributorError::NotFound(job_id.to_string());

        let cell = self.jobs.cell(job_id).await.ok_or_else(not_found)?;
        if cell.owner_id() != owner_id {
            return Err(not_found());
        }

        let outcome = self.jobs.cancel(job_id).await.ok_or_else(not_found)?;
        if outcome.changed {
            self.persister.mirror(&cell, outcome.job.next_index);
            info!(
                job_id,
                next_index = outcome.job.next_index,
                total_lines = outcome.job.total_lines(),
                "Distribution job cancelled"
            );
        } else {
            debug!(job_id, status = %outcome.job.status, "Cancel on finished job ignored");
        }

        Ok(cell.snapshot())
    }

    /// Durable history for `owner_id`, newest first. Every job is listed
    /// unless `history_limit` is configured.
    pub async fn list_queue_history(
        &self,
        owner_id: &str,
    ) -> Result<Vec<QueueHistoryEntry>, DistributorError> {
        let history = self
            .store
            .list_history(owner_id, self.config.history_rows())
            .map_err(|e| {
                warn!(owner_id, error = %e, "Failed to list queue history");
                e
            })?;
        Ok(history)
    }

    /// Re-register jobs the durable store still marks running and restart
    /// their timers from the stored cursor. Returns the resumed jobs; jobs
    /// already registered here are left alone.
    pub async fn recover_running_jobs(&self) -> Result<Vec<DistributionJob>, DistributorError> {
        let jobs = self.store.list_running(i64::MAX)?;
        let mut recovered = Vec::new();

        for job in jobs {
            if self.jobs.contains(&job.id).await {
                continue;
            }
            info!(
                job_id = %job.id,
                owner_id = %job.owner_id,
                next_index = job.next_index,
                total_lines = job.total_lines(),
                "Resuming distribution job"
            );
            self.start(JobCell::new(job.clone())).await;
            recovered.push(job);
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "Recovered running jobs");
        }
        Ok(recovered)
    }

    /// Wait until a job reaches a terminal status and return its final state.
    ///
    /// `None` for unknown IDs.
    pub async fn wait_for_terminal(&self, job_id: &str) -> Option<DistributionJob> {
        let cell = self.jobs.cell(job_id).await?;
        let mut status_rx = cell.subscribe();
        // The sender lives in the cell, so the channel cannot close here.
        let _ = status_rx.wait_for(|status| status.is_terminal()).await;
        Some(cell.snapshot())
    }

    /// Stop every job timer and wait for in-flight ticks to finish.
    ///
    /// Jobs keep their current status, so running jobs can be resumed later
    /// with [`Distributor::recover_running_jobs`].
    pub async fn shutdown(&self) {
        info!("Stopping distributor");
        let _ = self.shutdown_tx.send(());

        for timer in self.jobs.take_timers().await {
            if let Err(e) = timer.await {
                warn!(error = %e, "Job timer ended abnormally");
            }
        }

        info!("Distributor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, SqliteProgressStore};
    use crate::recipient::MemoryInbox;

    fn request(text: &str, targets: &[&str]) -> CreateJobRequest {
        CreateJobRequest {
            text: text.to_string(),
            interval_secs: 1,
            lines_per_tick: 1,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn distributor() -> (Distributor, MemoryInbox) {
        let inbox = MemoryInbox::with_recipients(["a", "b"]);
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        (
            Distributor::new(DistributorConfig::default(), store, Arc::new(inbox.clone())),
            inbox,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_job_registers_and_persists() {
        let (distributor, _inbox) = distributor();
        let job = distributor
            .create_job("admin", request("1\n2", &["a"]))
            .await
            .unwrap();

        assert!(job.id.starts_with("job_"));
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.next_index, 0);

        let details = distributor.get_job("admin", &job.id).await.unwrap();
        assert_eq!(details.queue.unwrap().len(), 2);
        assert_eq!(distributor.list_jobs("admin").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_job_rejects_invalid_request() {
        let (distributor, _inbox) = distributor();
        let err = distributor
            .create_job("admin", request("1\n2", &[]))
            .await
            .unwrap_err();

        assert!(matches!(err, DistributorError::Validation(_)));
        assert!(distributor.jobs().is_empty().await);
        assert!(distributor.list_queue_history("admin").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_owner_sees_not_found() {
        let (distributor, _inbox) = distributor();
        let job = distributor
            .create_job("alice", request("1\n2", &["a"]))
            .await
            .unwrap();

        assert!(matches!(
            distributor.get_job("bob", &job.id).await,
            Err(DistributorError::NotFound(_))
        ));
        assert!(matches!(
            distributor.cancel_job("bob", &job.id).await,
            Err(DistributorError::NotFound(_))
        ));
        assert!(distributor.list_jobs("bob").await.is_empty());
        assert_eq!(
            distributor.jobs().lookup(&job.id).await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_twice_is_noop() {
        let (distributor, _inbox) = distributor();
        let job = distributor
            .create_job("admin", request("1\n2\n3", &["a"]))
            .await
            .unwrap();

        let first = distributor.cancel_job("admin", &job.id).await.unwrap();
        let second = distributor.cancel_job("admin", &job.id).await.unwrap();
        assert_eq!(first.status, JobStatus::Cancelled);
        assert_eq!(second.status, JobStatus::Cancelled);
        assert_eq!(first.next_index, second.next_index);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_terminal() {
        let (distributor, inbox) = distributor();
        let job = distributor
            .create_job("admin", request("1\n2\n3", &["a", "b"]))
            .await
            .unwrap();

        let finished = distributor.wait_for_terminal(&job.id).await.unwrap();
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.next_index, 3);
        assert_eq!(inbox.texts("a").await, vec!["1", "3"]);
        assert_eq!(inbox.texts("b").await, vec!["2"]);
        assert!(distributor.wait_for_terminal("job_missing").await.is_none());
    }
}
