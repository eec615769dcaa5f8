//! Background dispatcher.
//!
//! Picks queued jobs and runs them with bounded concurrency. It wakes when
//! a job is submitted and also scans periodically, so a lost wake-up only
//! delays a job by one scan interval. Nothing is lost across restarts: jobs
//! live in the ledger, and startup recovery resumes or times them out.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Semaphore};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use continuity_ledger::LedgerStore;
use continuity_models::{JobId, JobRecord};

use crate::error::WorkerResult;
use crate::lifecycle::JobManager;
use crate::recovery::{self, RecoveryReport};
use crate::retry::FailureTracker;

/// Supplies ready jobs, oldest first.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn next_batch(&self, limit: usize) -> WorkerResult<Vec<JobId>>;
}

#[async_trait]
impl JobSource for LedgerStore {
    async fn next_batch(&self, limit: usize) -> WorkerResult<Vec<JobId>> {
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        let jobs = self.list_queued(limit).await?;
        Ok(jobs.into_iter().map(|job| job.id).collect())
    }
}

type InFlight = Arc<Mutex<HashSet<JobId>>>;

fn lock(in_flight: &Mutex<HashSet<JobId>>) -> MutexGuard<'_, HashSet<JobId>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Runs queued jobs on a bounded set of slots.
pub struct Dispatcher {
    manager: JobManager,
    source: Arc<dyn JobSource>,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    shutdown: watch::Sender<bool>,
}

impl Dispatcher {
    /// Dispatcher reading the ledger's queue.
    pub fn new(manager: JobManager) -> Self {
        let source: Arc<dyn JobSource> = Arc::new(manager.store().clone());
        Self::with_source(manager, source)
    }

    pub fn with_source(manager: JobManager, source: Arc<dyn JobSource>) -> Self {
        let semaphore = Arc::new(Semaphore::new(manager.config().max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);

        Self {
            manager,
            source,
            semaphore,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Jobs currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.manager.config().max_concurrent_jobs - self.semaphore.available_permits()
    }

    /// Recover, then dispatch until shutdown is signalled.
    pub async fn run(&self) -> WorkerResult<()> {
        let config = self.manager.config();
        info!(
            "Starting dispatcher with {} max concurrent jobs",
            config.max_concurrent_jobs
        );

        self.recover().await;

        let wake = self.manager.wake_handle();
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = tokio::time::interval(config.dispatch_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut failures = FailureTracker::new(3);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping dispatcher");
                        break;
                    }
                }
                _ = wake.notified() => {}
                _ = ticker.tick() => {}
            }

            match self.dispatch_available().await {
                Ok(_) => failures.record_success(),
                Err(e) => {
                    if failures.record_failure() {
                        warn!("Failed to scan for queued jobs: {}", e);
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                active = self.active_jobs(),
                "Shutdown timeout reached, remaining jobs resume on next start"
            );
        }

        info!("Dispatcher stopped");
        Ok(())
    }

    /// Start as many queued jobs as there are free slots.
    pub async fn dispatch_available(&self) -> WorkerResult<usize> {
        let available = self.semaphore.available_permits();
        if available == 0 {
            return Ok(0);
        }

        // Jobs spawned but not yet claimed still show up as queued
        let pending = lock(&self.in_flight).len();
        let batch = self.source.next_batch(available + pending).await?;

        let mut dispatched = 0;
        for job_id in batch {
            if !lock(&self.in_flight).insert(job_id.clone()) {
                continue;
            }
            let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                lock(&self.in_flight).remove(&job_id);
                break;
            };

            let manager = self.manager.clone();
            let in_flight = Arc::clone(&self.in_flight);
            tokio::spawn(async move {
                let _permit = permit;
                Self::execute_job(&manager, &job_id).await;
                lock(&in_flight).remove(&job_id);
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!("Dispatched {} jobs", dispatched);
        }
        Ok(dispatched)
    }

    async fn execute_job(manager: &JobManager, job_id: &JobId) {
        match manager.execute(job_id).await {
            Ok(Some(job)) => debug!(job_id = %job_id, state = %job.state, "Job finished"),
            Ok(None) => {}
            Err(e) => error!(job_id = %job_id, "Job execution failed: {}", e),
        }
    }

    /// Sweep stale work, then resume interrupted polls.
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = match recovery::sweep(&self.manager).await {
            Ok(report) => report,
            Err(e) => {
                error!("Startup recovery sweep failed: {}", e);
                RecoveryReport::default()
            }
        };

        match self.manager.store().list_resumable(Utc::now()).await {
            Ok(jobs) => {
                for job in jobs {
                    report.resumed += 1;
                    self.spawn_resume(job);
                }
            }
            Err(e) => error!("Failed to list resumable jobs: {}", e),
        }

        info!(
            timed_out = report.timed_out,
            requeued = report.requeued,
            refunded = report.refunded,
            resumed = report.resumed,
            "Startup recovery complete"
        );
        report
    }

    /// Continue polling a job once a slot frees up.
    pub fn spawn_resume(&self, job: JobRecord) {
        let semaphore = Arc::clone(&self.semaphore);
        let manager = self.manager.clone();
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };
            let job_id = job.id.clone();
            if let Err(e) = manager.resume(job).await {
                error!(job_id = %job_id, "Resumed job failed: {}", e);
            }
        });
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        while self.active_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::lifecycle::tests::{fast_config, funded, inputs, manager_with, FakeGeneration, FakeStitcher};
    use continuity_ledger::JobUpdate;
    use continuity_models::{JobState, OperationHandle};
    use std::time::Duration;

    async fn wait_for_state(manager: &JobManager, job_id: &JobId, state: JobState) -> JobRecord {
        for _ in 0..200 {
            let job = manager.store().get_job(job_id).await.unwrap().unwrap();
            if job.state == state {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("job {} never reached {}", job_id, state);
    }

    #[tokio::test]
    async fn test_submitted_jobs_run_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::succeeding()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let dispatcher = Arc::new(Dispatcher::new(manager.clone()));
        let runner = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.run().await }
        });

        let job = manager.submit(&user, inputs()).await.unwrap();
        let done = wait_for_state(&manager, &job.id, JobState::Succeeded).await;
        assert!(done.output_ref.is_some());

        dispatcher.shutdown();
        runner.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_respects_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            max_concurrent_jobs: 1,
            ..fast_config(dir.path())
        };
        // Stays pending, so the first job holds its slot
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            config,
        )
        .await;
        let user = funded(&manager, "u1", 20).await;

        let first = manager.submit(&user, inputs()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = manager.submit(&user, inputs()).await.unwrap();

        let dispatcher = Dispatcher::new(manager.clone());
        assert_eq!(dispatcher.dispatch_available().await.unwrap(), 1);
        assert_eq!(dispatcher.dispatch_available().await.unwrap(), 0);

        wait_for_state(&manager, &first.id, JobState::Polling).await;
        let waiting = manager.store().get_job(&second.id).await.unwrap().unwrap();
        assert_eq!(waiting.state, JobState::Queued);
        assert_eq!(dispatcher.active_jobs(), 1);
    }

    #[tokio::test]
    async fn test_recover_resumes_polling_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let generation = Arc::new(FakeGeneration::succeeding());
        let manager = manager_with(
            dir.path(),
            generation.clone(),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        // Left in `polling` by a previous process
        let job = manager.submit(&user, inputs()).await.unwrap();
        manager.start(&job.id).await.unwrap().unwrap();
        manager
            .store()
            .transition_job(
                &job.id,
                JobState::Polling,
                JobUpdate::default().with_handle(OperationHandle::new("operations/fake-1")),
            )
            .await
            .unwrap();

        let dispatcher = Dispatcher::new(manager.clone());
        let report = dispatcher.recover().await;
        assert_eq!(report.resumed, 1);

        wait_for_state(&manager, &job.id, JobState::Succeeded).await;
        assert_eq!(
            generation.submits.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;

        let dispatcher = Dispatcher::new(manager);
        dispatcher.shutdown();
        tokio::time::timeout(Duration::from_secs(2), dispatcher.run())
            .await
            .expect("run returns after shutdown")
            .unwrap();
    }
}
