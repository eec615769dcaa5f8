//! Recovery of jobs left behind by crashes and missed deadlines.
//!
//! A sweep times out active jobs past their liveness deadline, re-queues
//! jobs that were debited but never reached the queue, and refunds failed
//! jobs whose refund did not commit. Every step is idempotent, so sweeps
//! may overlap with live execution and with each other.

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use continuity_ledger::JobUpdate;
use continuity_models::JobState;

use crate::error::WorkerResult;
use crate::lifecycle::{JobManager, LIVENESS_REASON};

/// How long a debited job may wait for its enqueue before a sweep does it.
pub const STRANDED_GRACE_SECS: i64 = 60;

const BATCH_LIMIT: u32 = 100;

/// What one recovery pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub timed_out: u32,
    pub requeued: u32,
    pub refunded: u32,
    pub resumed: u32,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Run one recovery pass.
pub async fn sweep(manager: &JobManager) -> WorkerResult<RecoveryReport> {
    sweep_with_grace(manager, chrono::Duration::seconds(STRANDED_GRACE_SECS)).await
}

pub(crate) async fn sweep_with_grace(
    manager: &JobManager,
    stranded_grace: chrono::Duration,
) -> WorkerResult<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let now = Utc::now();

    for job in manager.store().list_expired_active(now).await? {
        warn!(
            job_id = %job.id,
            state = %job.state,
            deadline_at = ?job.deadline_at,
            "Job exceeded its liveness deadline"
        );
        match manager.fail(&job.id, JobState::TimedOut, LIVENESS_REASON).await {
            Ok(outcome) if outcome.transitioned => report.timed_out += 1,
            Ok(_) => {}
            Err(e) => error!(job_id = %job.id, "Failed to time out job: {}", e),
        }
    }

    for job in manager
        .store()
        .list_stranded_debited(now - stranded_grace, BATCH_LIMIT)
        .await?
    {
        match manager
            .store()
            .transition_job(&job.id, JobState::Queued, JobUpdate::default())
            .await
        {
            Ok(moved) if moved.is_applied() => {
                info!(job_id = %job.id, "Re-queued stranded job");
                report.requeued += 1;
            }
            Ok(_) => {}
            Err(e) => error!(job_id = %job.id, "Failed to re-queue job: {}", e),
        }
    }
    if report.requeued > 0 {
        manager.wake_handle().notify_one();
    }

    let settled = manager.accounting().reconcile_unrefunded(BATCH_LIMIT).await?;
    report.refunded = settled
        .iter()
        .filter(|(_, outcome)| outcome.is_refunded())
        .count() as u32;

    if !report.is_empty() {
        info!(
            timed_out = report.timed_out,
            requeued = report.requeued,
            refunded = report.refunded,
            "Recovery sweep complete"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::tests::{fast_config, funded, inputs, manager_with, FakeGeneration, FakeStitcher};
    use continuity_models::JobRecord;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweep_times_out_expired_jobs() {
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
        manager
            .store()
            .start_job(&job.id, Duration::from_millis(1))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = sweep(&manager).await.unwrap();
        assert_eq!(report.timed_out, 1);

        let job = manager.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::TimedOut);
        assert!(job.refunded);
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 10);

        // A second pass finds nothing to do
        assert!(sweep(&manager).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_requeues_stranded_debits() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            Arc::new(FakeGeneration::default()),
            Arc::new(FakeStitcher::default()),
            fast_config(dir.path()),
        )
        .await;
        let user = funded(&manager, "u1", 10).await;

        let job = manager
            .accounting()
            .debit_and_create_job(JobRecord::new(user.clone(), inputs(), 5), "stranded")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Too young under the default grace period
        assert_eq!(sweep(&manager).await.unwrap().requeued, 0);

        let report = sweep_with_grace(&manager, chrono::Duration::zero()).await.unwrap();
        assert_eq!(report.requeued, 1);

        let job = manager.store().get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(manager.accounting().balance(&user).await.unwrap(), 5);
    }
}
