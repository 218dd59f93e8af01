//! Per-job timers and the tick routine that delivers each round.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::persister::ProgressPersister;
use super::registry::{JobCell, RoundStart};
use super::types::TickOutcome;
use crate::metrics::{ACTIVE_JOBS, DELIVERY_FAILURES, LINES_DELIVERED, LINES_SKIPPED, TICKS_TOTAL};
use crate::recipient::Recipients;

/// Drives ticks for registered jobs.
#[derive(Clone)]
pub(crate) struct TickScheduler {
    recipients: Arc<dyn Recipients>,
    persister: ProgressPersister,
}

impl TickScheduler {
    pub(crate) fn new(recipients: Arc<dyn Recipients>, persister: ProgressPersister) -> Self {
        Self {
            recipients,
            persister,
        }
    }

    /// Spawn the recurring timer for a job.
    ///
    /// The first tick fires one period after spawning. The task exits when a
    /// tick reports a final outcome, when the job's stop signal fires, or on
    /// shutdown.
    pub(crate) fn spawn(
        &self,
        cell: Arc<JobCell>,
        period: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let scheduler = self.clone();
        let period = period.max(Duration::from_millis(1));

        tokio::spawn(async move {
            ACTIVE_JOBS.inc();
            debug!(job_id = %cell.id(), period_ms = period.as_millis() as u64, "Job timer started");

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(job_id = %cell.id(), "Job timer received shutdown signal");
                        break;
                    }
                    _ = cell.stopped() => {
                        debug!(job_id = %cell.id(), "Job timer stop requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        if scheduler.run_tick(&cell).await.is_final() {
                            break;
                        }
                    }
                }
            }

            ACTIVE_JOBS.dec();
            debug!(job_id = %cell.id(), "Job timer stopped");
        })
    }

    /// Run one firing of a job's timer.
    ///
    /// A firing that overlaps a tick still in flight for the same job does
    /// nothing.
    pub(crate) async fn run_tick(&self, cell: &JobCell) -> TickOutcome {
        let outcome = match cell.try_begin_tick() {
            Some(_in_flight) => self.deliver_round(cell).await,
            None => {
                debug!(job_id = %cell.id(), "Previous tick still in flight, skipping");
                TickOutcome::SkippedInFlight
            }
        };
        TICKS_TOTAL.with_label_values(&[outcome.label()]).inc();
        outcome
    }

    async fn deliver_round(&self, cell: &JobCell) -> TickOutcome {
        let (before, targets, lines_per_tick) = match cell.begin_round() {
            RoundStart::NotRunning => return TickOutcome::Stopped,
            RoundStart::Exhausted { cursor } => {
                self.persister.mirror(cell, cursor);
                info!(job_id = %cell.id(), total_lines = cursor, "Distribution job completed");
                return TickOutcome::Completed { lines: 0 };
            }
            RoundStart::Ready {
                cursor,
                targets,
                lines_per_tick,
            } => (cursor, targets, lines_per_tick),
        };

        let mut delivered = 0usize;
        let mut skipped = 0usize;
        let mut cut_short = false;

        for target in &targets {
            let resolved = self.recipients.exists(target).await;

            let range = match cell.claim(lines_per_tick) {
                Some(range) => range,
                None => {
                    cut_short = true;
                    break;
                }
            };
            if range.is_empty() {
                break;
            }

            if !resolved {
                warn!(
                    job_id = %cell.id(),
                    user_id = %target,
                    lines = range.len(),
                    "Recipient not found, skipping lines"
                );
                LINES_SKIPPED.inc_by(range.len() as u64);
                skipped += range.len();
                continue;
            }

            for delivery in cell.deliveries(range) {
                let line_number = delivery.line_number;
                match self.recipients.deliver(target, delivery).await {
                    Ok(()) => {
                        LINES_DELIVERED.inc();
                        delivered += 1;
                    }
                    Err(e) => {
                        warn!(
                            job_id = %cell.id(),
                            user_id = %target,
                            line_number,
                            error = %e,
                            "Failed to deliver line"
                        );
                        DELIVERY_FAILURES.inc();
                    }
                }
            }
        }

        let completed = cell.complete_if_exhausted();
        self.persister.mirror(cell, before);

        let lines = delivered + skipped;
        debug!(job_id = %cell.id(), delivered, skipped, "Tick finished");

        if completed {
            info!(job_id = %cell.id(), total_lines = before + lines, "Distribution job completed");
            TickOutcome::Completed { lines }
        } else if cut_short {
            TickOutcome::Stopped
        } else {
            TickOutcome::Delivered { lines }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{CreateJobRequest, DistributionJob, JobStatus, SqliteProgressStore};
    use crate::recipient::MemoryInbox;
    use crate::testing::MockRecipients;

    fn cell(text: &str, lines_per_tick: i64, targets: &[&str]) -> Arc<JobCell> {
        let spec = CreateJobRequest {
            text: text.to_string(),
            interval_secs: 1,
            lines_per_tick,
            target_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
        .validate()
        .unwrap();
        Arc::new(JobCell::new(DistributionJob::new("admin", spec)))
    }

    fn scheduler(recipients: Arc<dyn Recipients>) -> TickScheduler {
        let store = Arc::new(SqliteProgressStore::in_memory().unwrap());
        TickScheduler::new(recipients, ProgressPersister::new(store))
    }

    #[tokio::test]
    async fn test_tick_delivers_one_round() {
        let inbox = MemoryInbox::with_recipients(["a", "b"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3\n4\n5", 1, &["a", "b"]);

        let outcome = scheduler.run_tick(&cell).await;
        assert_eq!(outcome, TickOutcome::Delivered { lines: 2 });
        assert_eq!(inbox.texts("a").await, vec!["1"]);
        assert_eq!(inbox.texts("b").await, vec!["2"]);
        assert_eq!(cell.snapshot().next_index, 2);
    }

    #[tokio::test]
    async fn test_tick_completes_when_cursor_reaches_end() {
        let inbox = MemoryInbox::with_recipients(["a", "b"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3", 1, &["a", "b"]);

        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::Delivered { lines: 2 });
        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::Completed { lines: 1 });
        assert_eq!(cell.status(), JobStatus::Completed);
        assert_eq!(inbox.texts("a").await, vec!["1", "3"]);
        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_tick_on_exhausted_job_completes() {
        let inbox = MemoryInbox::with_recipients(["a"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("only", 1, &["a"]);
        cell.claim(1);

        let outcome = scheduler.run_tick(&cell).await;
        assert_eq!(outcome, TickOutcome::Completed { lines: 0 });
        assert_eq!(inbox.total_deliveries().await, 0);
    }

    #[tokio::test]
    async fn test_missing_recipient_skips_but_advances() {
        let inbox = MemoryInbox::with_recipients(["a"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3\n4", 1, &["a", "ghost"]);

        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::Delivered { lines: 2 });
        assert_eq!(inbox.texts("a").await, vec!["1"]);
        assert!(inbox.texts("ghost").await.is_empty());
        assert_eq!(cell.snapshot().next_index, 2);
    }

    #[tokio::test]
    async fn test_cancelled_job_tick_is_noop() {
        let inbox = MemoryInbox::with_recipients(["a"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2", 1, &["a"]);
        cell.cancel();

        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::Stopped);
        assert_eq!(inbox.total_deliveries().await, 0);
        assert_eq!(cell.snapshot().next_index, 0);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let inbox = MockRecipients::with_delay(["a"], Duration::from_millis(50));
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3", 1, &["a"]);

        let first = {
            let scheduler = scheduler.clone();
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { scheduler.run_tick(&cell).await })
        };
        inbox.wait_for_delivery_start().await;

        assert_eq!(scheduler.run_tick(&cell).await, TickOutcome::SkippedInFlight);
        assert_eq!(first.await.unwrap(), TickOutcome::Delivered { lines: 1 });
        assert_eq!(cell.snapshot().next_index, 1);
        assert_eq!(inbox.inbox().texts("a").await, vec!["1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_runs_until_completion() {
        let inbox = MemoryInbox::with_recipients(["a"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3", 1, &["a"]);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = scheduler.spawn(Arc::clone(&cell), Duration::from_secs(1), shutdown_rx);
        handle.await.unwrap();

        assert_eq!(cell.status(), JobStatus::Completed);
        assert_eq!(inbox.texts("a").await, vec!["1", "2", "3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_stops_on_shutdown() {
        let inbox = MemoryInbox::with_recipients(["a"]);
        let scheduler = scheduler(Arc::new(inbox.clone()));
        let cell = cell("1\n2\n3", 1, &["a"]);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = scheduler.spawn(Arc::clone(&cell), Duration::from_secs(10), shutdown_rx);
        tokio::time::sleep(Duration::from_secs(15)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(cell.status(), JobStatus::Running);
        assert_eq!(inbox.texts("a").await, vec!["1"]);
    }
}
