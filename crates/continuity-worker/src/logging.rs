//! Structured job logging.
//!
//! With a ledger attached, progress reports are also stored on the job
//! record so clients can follow a long-running job.

use tracing::{debug, error, info, warn, Span};

use continuity_ledger::{JobUpdate, LedgerStore};
use continuity_models::{JobId, JobState};

/// Logs lifecycle events of one job with `job_id` and `operation` fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    store: Option<LedgerStore>,
}

impl JobLogger {
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            store: None,
        }
    }

    /// Persist progress reports on the job record.
    pub fn with_store(mut self, store: LedgerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    /// Log a progress step and store it as the job's progress.
    pub async fn report_progress(&self, percent: u8, message: &str) {
        self.report(JobUpdate::default().with_progress(percent, message)).await;
    }

    /// Log and store a progress update. Storage errors are logged only.
    pub async fn report(&self, update: JobUpdate) {
        if let Some(message) = &update.message {
            self.log_progress(message);
        }
        let Some(store) = &self.store else {
            return;
        };

        let job_id = JobId::from_string(self.job_id.clone());
        match store.record_progress(&job_id, update).await {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %self.job_id, "Progress ignored, job no longer active"),
            Err(e) => self.log_warning(&format!("failed to record progress: {}", e)),
        }
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    /// Log the terminal state a job reached.
    pub fn log_completion(&self, state: JobState, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            state = %state,
            "Job finished: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span covering one job execution.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}
