//! Job record queries and lifecycle-state writes.
//!
//! State changes are compare-and-set: the `UPDATE` only matches rows whose
//! current state may legally move to the target state. When two actors
//! race to finish the same job (the poller and the stale job sweep, say)
//! exactly one of them wins and the other observes `Transition::Rejected`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::debug;

use continuity_models::{JobId, JobRecord, JobState, OperationHandle, UserAccount, UserId};

use crate::error::{LedgerError, LedgerResult};
use crate::rows::{self, now_millis, to_millis, JOB_COLUMNS};
use crate::store::LedgerStore;

/// Columns written together with a state change. `None` leaves the stored
/// value untouched; stored progress never decreases.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub operation_handle: Option<OperationHandle>,
    pub generated_ref: Option<String>,
    pub output_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub running_started_at: Option<DateTime<Utc>>,
    pub deadline_at: Option<DateTime<Utc>>,
    pub progress: Option<u8>,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn with_handle(mut self, handle: OperationHandle) -> Self {
        self.operation_handle = Some(handle);
        self
    }

    pub fn with_output(mut self, output_ref: impl Into<String>) -> Self {
        self.output_ref = Some(output_ref.into());
        self
    }

    pub fn with_generated(mut self, generated_ref: impl Into<String>) -> Self {
        self.generated_ref = Some(generated_ref.into());
        self
    }

    /// Record `reason` as the failure and as the latest message.
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.message = Some(reason.clone());
        self.failure_reason = Some(reason);
        self
    }

    pub fn with_progress(mut self, percent: u8, message: impl Into<String>) -> Self {
        self.progress = Some(percent.min(100));
        self.message = Some(message.into());
        self
    }

    pub fn with_deadline(mut self, started_at: DateTime<Utc>, deadline_at: DateTime<Utc>) -> Self {
        self.running_started_at = Some(started_at);
        self.deadline_at = Some(deadline_at);
        self
    }
}

/// Outcome of a compare-and-set state change.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The change was applied; the updated record.
    Applied(JobRecord),
    /// The job was not in an allowed source state; the record as found.
    Rejected(JobRecord),
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }

    pub fn record(&self) -> &JobRecord {
        match self {
            Transition::Applied(job) | Transition::Rejected(job) => job,
        }
    }

    pub fn into_record(self) -> JobRecord {
        match self {
            Transition::Applied(job) | Transition::Rejected(job) => job,
        }
    }
}

fn state_list(states: &[JobState]) -> String {
    states
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Move `job_id` to `to` if it is currently in one of `from`.
pub(crate) fn transition_from(
    conn: &Connection,
    job_id: &str,
    from: &[JobState],
    to: JobState,
    update: &JobUpdate,
    now_ms: i64,
) -> LedgerResult<Transition> {
    let allowed: Vec<JobState> = from
        .iter()
        .copied()
        .filter(|state| state.can_transition_to(to))
        .collect();

    let changed = if allowed.is_empty() {
        0
    } else {
        let sql = format!(
            "UPDATE jobs SET
                state = ?2,
                updated_at_ms = ?3,
                operation_handle = COALESCE(?4, operation_handle),
                output_ref = COALESCE(?5, output_ref),
                failure_reason = COALESCE(?6, failure_reason),
                running_started_at_ms = COALESCE(?7, running_started_at_ms),
                deadline_at_ms = COALESCE(?8, deadline_at_ms),
                generated_ref = COALESCE(?9, generated_ref),
                progress = MAX(progress, COALESCE(?10, progress)),
                last_message = COALESCE(?11, last_message)
             WHERE id = ?1 AND state IN ({})",
            state_list(&allowed)
        );
        conn.execute(
            &sql,
            params![
                job_id,
                to.as_str(),
                now_ms,
                update.operation_handle.as_ref().map(|h| h.as_str()),
                update.output_ref,
                update.failure_reason,
                update.running_started_at.map(to_millis),
                update.deadline_at.map(to_millis),
                update.generated_ref,
                update.progress,
                update.message,
            ],
        )?
    };

    let job = rows::require_job(conn, job_id)?;
    if changed == 1 {
        debug!(job_id, state = %to, "Job state changed");
        Ok(Transition::Applied(job))
    } else {
        Ok(Transition::Rejected(job))
    }
}

/// Move `job_id` to `to` from any state that may legally precede it.
pub(crate) fn transition(
    conn: &Connection,
    job_id: &str,
    to: JobState,
    update: &JobUpdate,
    now_ms: i64,
) -> LedgerResult<Transition> {
    transition_from(conn, job_id, &JobState::predecessors(to), to, update, now_ms)
}

impl LedgerStore {
    pub async fn get_job(&self, job_id: &JobId) -> LedgerResult<Option<JobRecord>> {
        let job_id = job_id.as_str().to_string();
        self.read(move |conn| rows::load_job(conn, &job_id)).await
    }

    pub async fn get_user(&self, user_id: &UserId) -> LedgerResult<Option<UserAccount>> {
        let user_id = user_id.as_str().to_string();
        self.read(move |conn| rows::load_user(conn, &user_id)).await
    }

    /// Jobs of one user, newest first.
    pub async fn list_user_jobs(&self, user_id: &UserId, limit: u32) -> LedgerResult<Vec<JobRecord>> {
        let user_id = user_id.as_str().to_string();
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs WHERE user_id = ?1 ORDER BY created_at_ms DESC, id DESC LIMIT ?2",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![user_id, limit])
        })
        .await
    }

    /// Jobs waiting for a dispatcher slot, oldest first.
    pub async fn list_queued(&self, limit: u32) -> LedgerResult<Vec<JobRecord>> {
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs WHERE state = 'queued' ORDER BY created_at_ms ASC, id ASC LIMIT ?1",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![limit])
        })
        .await
    }

    /// Debited jobs that never reached the queue and were created before
    /// `before` (the submitter stopped between debit and enqueue).
    pub async fn list_stranded_debited(&self, before: DateTime<Utc>, limit: u32) -> LedgerResult<Vec<JobRecord>> {
        let before_ms = to_millis(before);
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs WHERE state = 'debited' AND created_at_ms < ?1
                 ORDER BY created_at_ms ASC LIMIT ?2",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![before_ms, limit])
        })
        .await
    }

    /// Running or polling jobs whose liveness deadline has passed.
    pub async fn list_expired_active(&self, now: DateTime<Utc>) -> LedgerResult<Vec<JobRecord>> {
        let now_ms = to_millis(now);
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs
                 WHERE state IN ('running', 'polling') AND deadline_at_ms IS NOT NULL AND deadline_at_ms <= ?1
                 ORDER BY deadline_at_ms ASC",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![now_ms])
        })
        .await
    }

    /// Polling jobs with a stored handle and time left before their deadline.
    pub async fn list_resumable(&self, now: DateTime<Utc>) -> LedgerResult<Vec<JobRecord>> {
        let now_ms = to_millis(now);
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs
                 WHERE state = 'polling' AND operation_handle IS NOT NULL AND deadline_at_ms > ?1
                 ORDER BY deadline_at_ms ASC",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![now_ms])
        })
        .await
    }

    /// Failed or timed out jobs that were debited but never refunded.
    pub async fn list_unrefunded_failures(&self, limit: u32) -> LedgerResult<Vec<JobRecord>> {
        self.read(move |conn| {
            let sql = format!(
                "SELECT {} FROM jobs
                 WHERE state IN ('failed', 'timed_out') AND debited = 1 AND refunded = 0
                 ORDER BY updated_at_ms ASC LIMIT ?1",
                JOB_COLUMNS
            );
            rows::query_jobs(conn, &sql, params![limit])
        })
        .await
    }

    /// Compare-and-set state change from any legal predecessor state.
    pub async fn transition_job(
        &self,
        job_id: &JobId,
        to: JobState,
        update: JobUpdate,
    ) -> LedgerResult<Transition> {
        let job_id = job_id.as_str().to_string();
        self.write("job_transition", move |conn| {
            transition(conn, &job_id, to, &update, now_millis())
        })
        .await
    }

    /// Record progress of a running or polling job without changing its
    /// state. Returns false when the job is no longer active, so late
    /// updates never touch a terminated job.
    pub async fn record_progress(&self, job_id: &JobId, update: JobUpdate) -> LedgerResult<bool> {
        let job_id = job_id.as_str().to_string();
        self.write("job_progress", move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET
                    updated_at_ms = ?2,
                    generated_ref = COALESCE(?3, generated_ref),
                    progress = MAX(progress, COALESCE(?4, progress)),
                    last_message = COALESCE(?5, last_message)
                 WHERE id = ?1 AND state IN ('running', 'polling')",
                params![
                    job_id,
                    now_millis(),
                    update.generated_ref,
                    update.progress,
                    update.message,
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    /// Claim a queued job for execution: `queued → running`, stamping the
    /// liveness deadline. Returns `None` if someone else claimed it first.
    pub async fn start_job(&self, job_id: &JobId, liveness: Duration) -> LedgerResult<Option<JobRecord>> {
        let job_id = job_id.as_str().to_string();
        let liveness = chrono::Duration::from_std(liveness)
            .map_err(|_| LedgerError::corrupt("liveness window out of range"))?;

        self.write("job_start", move |conn| {
            let started_at = Utc::now();
            let update = JobUpdate::default().with_deadline(started_at, started_at + liveness);
            let outcome = transition_from(
                conn,
                &job_id,
                &[JobState::Queued],
                JobState::Running,
                &update,
                to_millis(started_at),
            )?;
            Ok(match outcome {
                Transition::Applied(job) => Some(job),
                Transition::Rejected(_) => None,
            })
        })
        .await
    }
}
