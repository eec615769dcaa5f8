//! Job lifecycle manager.
//!
//! Drives one job through
//! `submitted → debited → queued → running → polling → succeeded | failed | timed_out`.
//! Every failure inside execution ends in a terminal state, and failure
//! states are refunded in the same ledger transaction that records them.
//!
//! The liveness deadline is stamped on the job when it enters `running`.
//! Execution runs under that deadline as a monotonic `tokio::time::Instant`;
//! when it passes, the in-flight future is dropped (which also kills any
//! FFmpeg child) and the job is timed out. Results that arrive after
//! another actor terminated the job are logged and discarded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use continuity_ledger::{AccountingEngine, FailureOutcome, JobUpdate, LedgerError, LedgerStore};
use continuity_models::{
    ArtifactRef, CostBreakdown, GenerationStatus, JobId, JobInputs, JobRecord, JobState,
    OperationHandle, TransitionCostCalculator, UserId,
};

use crate::capabilities::{GenerationCapability, OutputSpec, StitchingCapability};
use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::retry::{retry_async, FailureTracker, RetryConfig};

/// Failure reason stored on jobs cancelled by their owner.
pub const CANCEL_REASON: &str = "cancelled by user";

/// Failure reason stored on jobs that ran past their deadline.
pub const LIVENESS_REASON: &str = "liveness deadline exceeded";

const OPERATION: &str = "transition";

const PROGRESS_STARTED: u8 = 5;
const PROGRESS_SUBMITTED: u8 = 20;
const PROGRESS_GENERATED: u8 = 70;
const PROGRESS_STITCHING: u8 = 75;

fn record_terminal(state: JobState) {
    metrics::counter!("jobs_terminal_total", "state" => state.as_str()).increment(1);
}

/// Owns job state transitions and talks to the external capabilities.
#[derive(Clone)]
pub struct JobManager {
    accounting: AccountingEngine,
    generation: Arc<dyn GenerationCapability>,
    stitching: Arc<dyn StitchingCapability>,
    config: Arc<WorkerConfig>,
    wake: Arc<Notify>,
}

impl JobManager {
    pub fn new(
        accounting: AccountingEngine,
        generation: Arc<dyn GenerationCapability>,
        stitching: Arc<dyn StitchingCapability>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            accounting,
            generation,
            stitching,
            config: Arc::new(config),
            wake: Arc::new(Notify::new()),
        }
    }

    pub fn accounting(&self) -> &AccountingEngine {
        &self.accounting
    }

    pub fn store(&self) -> &LedgerStore {
        self.accounting.store()
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Notified whenever a job becomes ready to dispatch.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    /// Credits `inputs` would cost.
    pub fn quote(&self, inputs: &JobInputs) -> CostBreakdown {
        TransitionCostCalculator::new(inputs)
            .with_base_cost(self.config.base_cost)
            .calculate()
    }

    /// Validate, debit and enqueue a new job.
    ///
    /// On insufficient funds no job record exists afterwards and nothing
    /// was debited.
    pub async fn submit(&self, user_id: &UserId, inputs: JobInputs) -> WorkerResult<JobRecord> {
        if let Some(message) = inputs.validation_message() {
            return Err(WorkerError::invalid_input(message));
        }

        let cost = self.quote(&inputs);
        let job = JobRecord::new(user_id.clone(), inputs, cost.total);
        let job = self
            .accounting
            .debit_and_create_job(job, &cost.to_description())
            .await?;

        let job = match self
            .store()
            .transition_job(&job.id, JobState::Queued, JobUpdate::default())
            .await
        {
            Ok(moved) => moved.into_record(),
            Err(e) => {
                // Recovery enqueues stranded debited jobs
                warn!(job_id = %job.id, "Job debited but not queued: {}", e);
                job
            }
        };

        metrics::counter!("jobs_submitted_total").increment(1);
        info!(
            job_id = %job.id,
            user_id = %user_id,
            credits = job.cost,
            "Job submitted"
        );

        self.wake.notify_one();
        Ok(job)
    }

    /// Claim a queued job: `queued → running` with a fresh deadline.
    ///
    /// Returns `None` when another worker claimed it first.
    pub async fn start(&self, job_id: &JobId) -> WorkerResult<Option<JobRecord>> {
        Ok(self
            .store()
            .start_job(job_id, self.config.liveness_timeout)
            .await?)
    }

    /// Claim and run a queued job to a terminal state.
    pub async fn execute(&self, job_id: &JobId) -> WorkerResult<Option<JobRecord>> {
        let Some(job) = self.start(job_id).await? else {
            debug!(job_id = %job_id, "Job already claimed");
            return Ok(None);
        };
        self.drive(job, None).await.map(Some)
    }

    /// Continue polling a job that was interrupted while `polling`.
    pub async fn resume(&self, job: JobRecord) -> WorkerResult<JobRecord> {
        let Some(handle) = job.operation_handle.clone() else {
            warn!(job_id = %job.id, "Cannot resume job without an operation handle");
            return Ok(job);
        };
        info!(job_id = %job.id, operation = %handle, "Resuming job");
        self.drive(job, Some(handle)).await
    }

    fn deadline_instant(&self, job: &JobRecord) -> Instant {
        let remaining = job
            .deadline_at
            .map(|deadline| (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.config.liveness_timeout);
        Instant::now() + remaining
    }

    async fn drive(&self, job: JobRecord, handle: Option<OperationHandle>) -> WorkerResult<JobRecord> {
        let logger = JobLogger::new(&job.id, OPERATION).with_store(self.store().clone());
        let span = logger.create_span();

        async {
            let deadline = self.deadline_instant(&job);
            logger.log_start(&format!("cost {} credits", job.cost));

            let outcome =
                tokio::time::timeout_at(deadline, self.run_to_completion(&job, handle, &logger)).await;

            match outcome {
                Ok(Ok(output)) => self.complete(&job, output, &logger).await,
                Ok(Err(WorkerError::Superseded(state))) => {
                    logger.log_warning(&format!("stopped, job already {}", state));
                    self.current(&job.id).await
                }
                Ok(Err(e)) => {
                    let reason = e.to_string();
                    logger.log_error(&reason);
                    Ok(self.fail(&job.id, JobState::Failed, &reason).await?.job)
                }
                Err(_) => {
                    logger.log_error(LIVENESS_REASON);
                    Ok(self.fail(&job.id, JobState::TimedOut, LIVENESS_REASON).await?.job)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_to_completion(
        &self,
        job: &JobRecord,
        handle: Option<OperationHandle>,
        logger: &JobLogger,
    ) -> WorkerResult<ArtifactRef> {
        let handle = match handle {
            Some(handle) => handle,
            None => self.run(job, logger).await?,
        };
        let generated = self.poll(&handle, logger).await?;
        self.stitch(job, generated, logger).await
    }

    /// Submit to the generation service and move to `polling`.
    async fn run(&self, job: &JobRecord, logger: &JobLogger) -> WorkerResult<OperationHandle> {
        logger.report_progress(PROGRESS_STARTED, "submitting to generation service").await;
        let policy = RetryConfig::external("generation_submit", &self.config);
        let handle = retry_async(&policy, || self.generation.submit(&job.inputs)).await?;

        let message = format!("generation submitted as {}", handle);
        let moved = self
            .store()
            .transition_job(
                &job.id,
                JobState::Polling,
                JobUpdate::default()
                    .with_handle(handle.clone())
                    .with_progress(PROGRESS_SUBMITTED, message.as_str()),
            )
            .await?;
        if !moved.is_applied() {
            return Err(WorkerError::Superseded(moved.record().state));
        }

        logger.log_progress(&message);
        Ok(handle)
    }

    /// Query the operation until it finishes.
    async fn poll(&self, handle: &OperationHandle, logger: &JobLogger) -> WorkerResult<ArtifactRef> {
        let mut failures = FailureTracker::new(self.config.max_poll_failures);

        loop {
            match self.generation.poll(handle).await {
                Ok(GenerationStatus::Pending) => failures.record_success(),
                Ok(GenerationStatus::Succeeded { artifact }) => {
                    logger
                        .report(
                            JobUpdate::default()
                                .with_generated(artifact.as_str())
                                .with_progress(PROGRESS_GENERATED, "generation finished"),
                        )
                        .await;
                    return Ok(artifact);
                }
                Ok(GenerationStatus::Failed { reason }) => {
                    return Err(WorkerError::GenerationFailed(reason));
                }
                Err(e) if e.is_retryable() => {
                    if failures.record_failure() {
                        logger.log_warning(&format!("status poll failed: {}", e));
                    }
                    if failures.failure_count() >= self.config.max_poll_failures {
                        return Err(WorkerError::PollFailures(e.to_string()));
                    }
                }
                Err(e) => return Err(e.into()),
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Combine `[clip_a, generated, clip_c]` into the job's output file.
    async fn stitch(
        &self,
        job: &JobRecord,
        generated: ArtifactRef,
        logger: &JobLogger,
    ) -> WorkerResult<ArtifactRef> {
        let output = OutputSpec {
            path: self.config.output_path(&job.id),
        };
        if let Some(parent) = output.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        logger.report_progress(PROGRESS_STITCHING, "stitching clips").await;
        let artifacts = [job.inputs.clip_a.clone(), generated, job.inputs.clip_c.clone()];
        let policy = RetryConfig::external("stitch", &self.config);
        let stitched = retry_async(&policy, || self.stitching.combine(&artifacts, &output)).await?;

        Ok(stitched)
    }

    async fn complete(
        &self,
        job: &JobRecord,
        output: ArtifactRef,
        logger: &JobLogger,
    ) -> WorkerResult<JobRecord> {
        let moved = self
            .store()
            .transition_job(
                &job.id,
                JobState::Succeeded,
                JobUpdate::default()
                    .with_output(output.as_str())
                    .with_progress(100, "completed"),
            )
            .await?;

        if moved.is_applied() {
            record_terminal(JobState::Succeeded);
            logger.log_completion(JobState::Succeeded, output.as_str());
        } else {
            logger.log_warning(&format!(
                "ignoring late result, job already {}",
                moved.record().state
            ));
        }
        Ok(moved.into_record())
    }

    /// Terminate a job in a failure state and refund it.
    ///
    /// A job another actor already terminated keeps its state; a refund it
    /// is still owed is settled, a succeeded job is never refunded.
    pub async fn fail(
        &self,
        job_id: &JobId,
        terminal: JobState,
        reason: &str,
    ) -> WorkerResult<FailureOutcome> {
        let outcome = self
            .accounting
            .fail_and_refund(job_id, terminal, reason)
            .await?;

        if outcome.transitioned {
            record_terminal(terminal);
            info!(job_id = %job_id, state = %terminal, reason, "Job failed");
        } else {
            info!(
                job_id = %job_id,
                state = %outcome.job.state,
                "Late failure ignored, job already terminal"
            );
        }
        Ok(outcome)
    }

    /// Cancel the caller's own queued job and refund it.
    pub async fn cancel(&self, job_id: &JobId, user_id: &UserId) -> WorkerResult<JobRecord> {
        let outcome = self
            .accounting
            .cancel_queued(job_id, user_id, CANCEL_REASON)
            .await?;
        record_terminal(JobState::Failed);
        Ok(outcome.job)
    }

    async fn current(&self, job_id: &JobId) -> WorkerResult<JobRecord> {
        self.store()
            .get_job(job_id)
            .await?
            .ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()).into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capabilities::{CapabilityError, MockGenerationCapability};
    use async_trait::async_trait;
    use continuity_ledger::{LedgerConfig, RefundOutcome};
    use continuity_models::idempotency;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Generation service that replays scripted poll results, then stays pending.
    #[derive(Default)]
    pub(crate) struct FakeGeneration {
        pub submit_error: Option<CapabilityError>,
        pub polls: Mutex<VecDeque<Result<GenerationStatus, CapabilityError>>>,
        pub submits: AtomicU32,
    }

    impl FakeGeneration {
        pub fn with_polls(polls: Vec<Result<GenerationStatus, CapabilityError>>) -> Self {
            Self {
                polls: Mutex::new(polls.into()),
                ..Default::default()
            }
        }

        pub fn succeeding() -> Self {
            Self::with_polls(vec![
                Ok(GenerationStatus::Pending),
                Ok(GenerationStatus::Succeeded {
                    artifact: ArtifactRef::new("https://gen.example.com/generated.mp4"),
                }),
            ])
        }
    }

    #[async_trait]
    impl GenerationCapability for FakeGeneration {
        async fn submit(&self, _inputs: &JobInputs) -> Result<OperationHandle, CapabilityError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            match &self.submit_error {
                Some(e) => Err(e.clone()),
                None => Ok(OperationHandle::new("operations/fake-1")),
            }
        }

        async fn poll(&self, _handle: &OperationHandle) -> Result<GenerationStatus, CapabilityError> {
            self.polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(GenerationStatus::Pending))
        }
    }

    /// Stitcher that records its inputs and reports the output path.
    #[derive(Default)]
    pub(crate) struct FakeStitcher {
        pub calls: Mutex<Vec<Vec<ArtifactRef>>>,
    }

    #[async_trait]
    impl StitchingCapability for FakeStitcher {
        async fn combine(
            &self,
            artifacts: &[ArtifactRef],
            output: &OutputSpec,
        ) -> Result<ArtifactRef, CapabilityError> {
            self.calls.lock().unwrap().push(artifacts.to_vec());
            Ok(ArtifactRef::new(output.path.to_string_lossy()))
        }
    }

    pub(crate) fn fast_config(dir: &Path) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            liveness_timeout: Duration::from_secs(5),
            dispatch_interval: Duration::from_millis(20),
            shutdown_timeout: Duration::from_secs(5),
            work_dir: dir.join("work"),
            max_poll_failures: 3,
            external_max_retries: 2,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    pub(crate) async fn manager_with(
        dir: &Path,
        generation: Arc<dyn GenerationCapability>,
        stitching: Arc<dyn StitchingCapability>,
        config: WorkerConfig,
    ) -> JobManager {
        let store = LedgerStore::open(LedgerConfig::with_path(dir.join("ledger.db")))
            .await
            .expect("open ledger");
        JobManager::new(AccountingEngine::new(store), generation, stitching, config)
    }

    pub(crate) async fn funded(manager: &JobManager, user: &str, credits: u64) -> UserId {
        let user_id = UserId::new(user);
        manager.accounting().ensure_account(&user_id).await.unwrap();
        manager
            .accounting()
            .apply_topup(&idempotency::topup(&format!("seed-{}", user)), &user_id, credits)
            .await
            .unwrap();
        user_id
    }

    pub(crate) fn inputs() -> JobInputs {
        JobInputs::new(
            ArtifactRef::new("/clips/a.mp4"),
            ArtifactRef::new("/clips/c.mp4"),
            "slow dolly through fog",
        )
    }

    #[tokio::test]
    async fn test_successful_job_keeps_debit() {
        let dir = tempfile::tempdir().unwrap();
        let stitcher = Arc::new(FakeStitcher::default());
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::succeeding()),
            stitcher.clone(),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 5);

        let done = manager.execute(&job.id).await.unwrap().expect("claimed");
        assert_eq!(done.state, JobState::Succeeded);
        assert!(!done.refunded);
        assert_eq!(done.operation_handle.as_ref().map(|h| h.as_str()), Some("operations/fake-1"));

        let expected = manager.config().output_path(&job.id);
        assert_eq!(done.output_ref.as_deref(), Some(expected.to_string_lossy().as_ref()));
        assert_eq!(done.generated_ref.as_deref(), Some("https://gen.example.com/generated.mp4"));
        assert_eq!(done.progress, 100);
        assert_eq!(done.last_message.as_deref(), Some("completed"));
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 5);

        let calls = stitcher.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![
                ArtifactRef::new("/clips/a.mp4"),
                ArtifactRef::new("https://gen.example.com/generated.mp4"),
                ArtifactRef::new("/clips/c.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn test_stitch_failure_keeps_generated_clip() {
        struct BrokenStitcher;

        #[async_trait]
        impl StitchingCapability for BrokenStitcher {
            async fn combine(
                &self,
                _artifacts: &[ArtifactRef],
                _output: &OutputSpec,
            ) -> Result<ArtifactRef, CapabilityError> {
                Err(CapabilityError::permanent("unsupported codec"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::succeeding()),
            Arc::new(BrokenStitcher),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        assert_eq!(job.progress, 0);
        let done = manager.execute(&job.id).await.unwrap().unwrap();

        assert_eq!(done.state, JobState::Failed);
        assert!(done.refunded);
        assert_eq!(done.generated_ref.as_deref(), Some("https://gen.example.com/generated.mp4"));
        assert!(done.output_ref.is_none());
        assert_eq!(done.progress, PROGRESS_STITCHING);
        assert!(done.last_message.unwrap().contains("unsupported codec"));
    }

    #[tokio::test]
    async fn test_generation_failure_refunds_once() {
        let dir = tempfile::tempdir().unwrap();
        let generation = FakeGeneration::with_polls(vec![Ok(GenerationStatus::Failed {
            reason: "content policy".to_string(),
        })]);
        let manager = manager_with(
            dir.path(),
            Arc::new(generation),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let done = manager.execute(&job.id).await.unwrap().unwrap();

        assert_eq!(done.state, JobState::Failed);
        assert!(done.refunded);
        assert!(done.failure_reason.unwrap().contains("content policy"));
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);

        // Retrying the failure path does not refund again
        let again = manager.fail(&job.id, JobState::Failed, "retry").await.unwrap();
        assert!(!again.transitioned);
        assert!(matches!(again.refund, Some(RefundOutcome::AlreadyRefunded)));
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_liveness_deadline_times_out_and_refunds() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkerConfig {
            liveness_timeout: Duration::from_millis(300),
            ..fast_config(dir.path())
        };
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            config,
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let done = manager.execute(&job.id).await.unwrap().unwrap();

        assert_eq!(done.state, JobState::TimedOut);
        assert_eq!(done.failure_reason.as_deref(), Some(LIVENESS_REASON));
        assert!(done.refunded);
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_insufficient_funds_creates_no_job() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 3).await;

        let err = manager.submit(&user, inputs()).await.unwrap_err();
        assert!(err.is_insufficient_funds());
        assert!(manager.store().list_user_jobs(&user, 10).await.unwrap().is_empty());
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected_before_debit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let mut bad = inputs();
        bad.prompt = String::new();
        let err = manager.submit(&user, bad).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidInput(_)));
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_repeated_poll_errors_fail_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let generation = FakeGeneration::with_polls(vec![
            Err(CapabilityError::transient("503")),
            Err(CapabilityError::transient("503")),
            Err(CapabilityError::transient("503")),
            Ok(GenerationStatus::Pending),
        ]);
        let manager = manager_with(
            dir.path(),
            Arc::new(generation),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let done = manager.execute(&job.id).await.unwrap().unwrap();

        assert_eq!(done.state, JobState::Failed);
        assert!(done.refunded);
    }

    #[tokio::test]
    async fn test_permanent_submit_error_skips_polling() {
        let dir = tempfile::tempdir().unwrap();
        let mut generation = MockGenerationCapability::new();
        generation
            .expect_submit()
            .times(1)
            .returning(|_| Err(CapabilityError::permanent("invalid clip")));
        generation.expect_poll().times(0);

        let manager = manager_with(
            dir.path(),
            Arc::new(generation),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let done = manager.execute(&job.id).await.unwrap().unwrap();

        assert_eq!(done.state, JobState::Failed);
        assert!(done.operation_handle.is_none());
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_late_success_after_timeout_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let running = manager.start(&job.id).await.unwrap().unwrap();
        manager
            .fail(&job.id, JobState::TimedOut, LIVENESS_REASON)
            .await
            .unwrap();

        let logger = JobLogger::new(&job.id, OPERATION);
        let late = manager
            .complete(&running, ArtifactRef::new("/work/late.mp4"), &logger)
            .await
            .unwrap();

        assert_eq!(late.state, JobState::TimedOut);
        assert!(late.output_ref.is_none());
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_execute_claims_once() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::succeeding()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        manager.execute(&job.id).await.unwrap().unwrap();
        assert!(manager.execute(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_queued_job() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager.submit(&user, inputs()).await.unwrap();
        let cancelled = manager.cancel(&job.id, &user).await.unwrap();

        assert_eq!(cancelled.state, JobState::Failed);
        assert_eq!(cancelled.failure_reason.as_deref(), Some(CANCEL_REASON));
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);
        assert!(manager.execute(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_polls_stored_handle() {
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

        let job = manager.submit(&user, inputs()).await.unwrap();
        manager.start(&job.id).await.unwrap().unwrap();
        let polling = manager
            .store()
            .transition_job(
                &job.id,
                JobState::Polling,
                JobUpdate::default().with_handle(OperationHandle::new("operations/fake-1")),
            )
            .await
            .unwrap()
            .into_record();

        let done = manager.resume(polling).await.unwrap();
        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(generation.submits.load(Ordering::SeqCst), 0);
    }
}
