//! Accounting engine: the only writer of balances.
//!
//! All balance mutations run inside one immediate write transaction that
//! also appends the matching ledger transaction, so a balance change and
//! its audit record are committed or discarded together. Each mutation is
//! keyed:
//! - `debit:{job_id}` for the one debit of a job
//! - `refund:{job_id}` for the one refund of a job, also guarded by the
//!   job's `refunded` flag
//! - the caller's key (`topup:{event_id}`) for payment top-ups

use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

use continuity_models::{
    idempotency, JobId, JobRecord, JobState, LedgerTransaction, TransactionKind, UserAccount, UserId,
};

use crate::error::{LedgerError, LedgerResult};
use crate::history::{self, HistoryPage, HistoryQuery};
use crate::jobs::{transition, transition_from, JobUpdate};
use crate::metrics::{record_credits, record_operation};
use crate::rows::{self, now_millis};
use crate::store::LedgerStore;

// =============================================================================
// Outcomes
// =============================================================================

/// Proof of an applied debit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitToken {
    pub transaction_id: String,
    pub idempotency_key: String,
    pub user_id: UserId,
    pub amount: u64,
    pub balance_after: u64,
}

/// Result of a refund request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Credits were returned now.
    Refunded { amount: u64, balance_after: u64 },
    /// The job was refunded earlier; nothing changed.
    AlreadyRefunded,
    /// The job was never charged; nothing to return.
    NotDebited,
}

impl RefundOutcome {
    pub fn is_refunded(&self) -> bool {
        matches!(self, RefundOutcome::Refunded { .. })
    }
}

/// Result of a top-up request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopupOutcome {
    Applied { balance_after: u64 },
    /// The idempotency key was seen before; nothing changed.
    Duplicate,
}

/// Result of moving a job to a failure state and settling its refund.
#[derive(Debug, Clone)]
pub struct FailureOutcome {
    /// The job as stored after the operation.
    pub job: JobRecord,
    /// Whether this call performed the state change.
    pub transitioned: bool,
    /// Refund result; `None` when the job ended in a non-refundable state.
    pub refund: Option<RefundOutcome>,
}

// =============================================================================
// Transaction-scoped primitives
// =============================================================================

fn debit_in(
    conn: &Connection,
    user_id: &UserId,
    amount: u64,
    idempotency_key: &str,
    job_id: Option<&JobId>,
    description: &str,
) -> LedgerResult<LedgerTransaction> {
    if amount == 0 {
        return Err(LedgerError::invalid_amount("debit must be positive"));
    }

    let available = rows::load_user(conn, user_id.as_str())?
        .map(|account| account.balance)
        .unwrap_or(0);
    if available < amount {
        return Err(LedgerError::InsufficientFunds {
            available,
            requested: amount,
        });
    }

    let balance_after = available - amount;
    rows::set_balance(conn, user_id.as_str(), balance_after, now_millis())?;

    let mut tx = LedgerTransaction::new(
        idempotency_key,
        user_id.clone(),
        TransactionKind::Debit,
        amount,
        balance_after,
    )
    .with_description(description);
    if let Some(job_id) = job_id {
        tx = tx.with_job_id(job_id.clone());
    }

    if !rows::append_transaction(conn, &tx)? {
        return Err(LedgerError::corrupt(format!(
            "debit {} was already applied",
            idempotency_key
        )));
    }
    Ok(tx)
}

fn refund_in(conn: &Connection, job_id: &str, amount: u64) -> LedgerResult<RefundOutcome> {
    let job = rows::require_job(conn, job_id)?;

    if job.refunded {
        return Ok(RefundOutcome::AlreadyRefunded);
    }
    if !job.debited {
        return Ok(RefundOutcome::NotDebited);
    }
    if !job.state.is_refundable() {
        return Err(LedgerError::RefundRejected {
            job_id: job_id.to_string(),
            reason: format!("job is {}", job.state),
        });
    }
    if amount == 0 || amount > job.cost {
        return Err(LedgerError::invalid_amount(format!(
            "refund of {} for job costing {}",
            amount, job.cost
        )));
    }

    let account = rows::load_user(conn, job.user_id.as_str())?
        .ok_or_else(|| LedgerError::UserNotFound(job.user_id.to_string()))?;
    let balance_after = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid_amount("balance overflow"))?;

    let now_ms = now_millis();
    rows::set_balance(conn, job.user_id.as_str(), balance_after, now_ms)?;

    let flagged = conn.execute(
        "UPDATE jobs SET refunded = 1, updated_at_ms = ?2 WHERE id = ?1 AND refunded = 0",
        params![job_id, now_ms],
    )?;
    if flagged != 1 {
        return Err(LedgerError::corrupt(format!("refund flag race on job {}", job_id)));
    }

    let tx = LedgerTransaction::new(
        idempotency::refund(&job.id),
        job.user_id.clone(),
        TransactionKind::Refund,
        amount,
        balance_after,
    )
    .with_job_id(job.id.clone())
    .with_description(format!("Refund: {}", job.failure_reason.as_deref().unwrap_or("job failed")));

    if !rows::append_transaction(conn, &tx)? {
        return Err(LedgerError::corrupt(format!(
            "refund transaction exists for unflagged job {}",
            job_id
        )));
    }

    Ok(RefundOutcome::Refunded {
        amount,
        balance_after,
    })
}

fn topup_in(
    conn: &Connection,
    idempotency_key: &str,
    user_id: &UserId,
    amount: u64,
    description: &str,
) -> LedgerResult<TopupOutcome> {
    if rows::transaction_exists(conn, idempotency_key)? {
        return Ok(TopupOutcome::Duplicate);
    }
    if amount == 0 {
        return Err(LedgerError::invalid_amount("top-up must be positive"));
    }

    let account = rows::load_user(conn, user_id.as_str())?
        .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;
    let balance_after = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| LedgerError::invalid_amount("balance overflow"))?;

    rows::set_balance(conn, user_id.as_str(), balance_after, now_millis())?;

    let tx = LedgerTransaction::new(
        idempotency_key,
        user_id.clone(),
        TransactionKind::Topup,
        amount,
        balance_after,
    )
    .with_description(description);
    if !rows::append_transaction(conn, &tx)? {
        return Ok(TopupOutcome::Duplicate);
    }

    Ok(TopupOutcome::Applied { balance_after })
}

// =============================================================================
// Accounting Engine
// =============================================================================

/// Serialized balance mutation over the ledger store.
#[derive(Clone, Debug)]
pub struct AccountingEngine {
    store: LedgerStore,
}

impl AccountingEngine {
    pub fn new(store: LedgerStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Create the account with a zero balance on first use.
    pub async fn ensure_account(&self, user_id: &UserId) -> LedgerResult<UserAccount> {
        let id = user_id.as_str().to_string();
        self.store
            .write("ensure_account", move |conn| rows::ensure_user(conn, &id, now_millis()))
            .await
    }

    /// Current balance of an existing account.
    pub async fn balance(&self, user_id: &UserId) -> LedgerResult<u64> {
        self.store
            .get_user(user_id)
            .await?
            .map(|account| account.balance)
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
    }

    /// Check and decrement the balance under the write lock.
    ///
    /// Fails with `InsufficientFunds` and changes nothing if the balance is
    /// below `amount`.
    pub async fn reserve_and_debit(&self, user_id: &UserId, amount: u64) -> LedgerResult<DebitToken> {
        let user = user_id.clone();
        let key = format!("reserve:{}", Uuid::new_v4());

        let result = self
            .store
            .write("reserve_and_debit", move |conn| {
                debit_in(conn, &user, amount, &key, None, TransactionKind::Debit.label())
            })
            .await;

        let tx = self.observe_debit(user_id, amount, result)?;
        Ok(DebitToken {
            transaction_id: tx.id,
            idempotency_key: tx.idempotency_key,
            user_id: tx.user_id,
            amount: tx.amount,
            balance_after: tx.balance_after,
        })
    }

    /// Debit a job's cost and insert its record in `debited`, atomically.
    ///
    /// On `InsufficientFunds` neither the debit nor the job row exists.
    pub async fn debit_and_create_job(&self, job: JobRecord, description: &str) -> LedgerResult<JobRecord> {
        let user_id = job.user_id.clone();
        let cost = job.cost;
        let description = description.to_string();

        let result = self
            .store
            .write("debit_and_create_job", move |conn| {
                let tx = debit_in(
                    conn,
                    &job.user_id,
                    job.cost,
                    &idempotency::debit(&job.id),
                    Some(&job.id),
                    &description,
                )?;

                let mut record = job.clone();
                record.state = JobState::Debited;
                record.debited = true;
                record.created_at = tx.created_at;
                record.updated_at = tx.created_at;
                rows::insert_job(conn, &record)?;
                Ok((tx, record))
            })
            .await
            .map(|(tx, record)| {
                info!(
                    job_id = %record.id,
                    balance_after = tx.balance_after,
                    "Job created and debited"
                );
                (tx, record)
            });

        let (_, record) = self.observe_debit(&user_id, cost, result)?;
        Ok(record)
    }

    fn observe_debit<T>(&self, user_id: &UserId, amount: u64, result: LedgerResult<T>) -> LedgerResult<T> {
        match &result {
            Ok(_) => {
                record_operation("debit", "applied");
                record_credits(TransactionKind::Debit.as_str(), amount);
                info!(user_id = %user_id, credits = amount, "Debited credits");
            }
            Err(LedgerError::InsufficientFunds { available, requested }) => {
                record_operation("debit", "insufficient_funds");
                info!(
                    user_id = %user_id,
                    available = *available,
                    requested = *requested,
                    "Debit rejected: insufficient funds"
                );
            }
            Err(e) => {
                record_operation("debit", "error");
                warn!(user_id = %user_id, credits = amount, "Debit failed: {}", e);
            }
        }
        result
    }

    /// Return `amount` credits for a failed job, at most once.
    pub async fn refund(&self, job_id: &JobId, amount: u64) -> LedgerResult<RefundOutcome> {
        let id = job_id.as_str().to_string();
        let outcome = self
            .store
            .write("refund", move |conn| refund_in(conn, &id, amount))
            .await?;
        self.observe_refund(job_id, &outcome);
        Ok(outcome)
    }

    /// Move a job to a failure state and refund it in one transaction.
    ///
    /// If the job already reached a terminal state the state is left as it
    /// is. A refund owed by that earlier failure is still settled, while a
    /// job that succeeded is never refunded.
    pub async fn fail_and_refund(
        &self,
        job_id: &JobId,
        terminal: JobState,
        reason: &str,
    ) -> LedgerResult<FailureOutcome> {
        if !terminal.is_refundable() {
            return Err(LedgerError::InvalidTransition {
                job_id: job_id.to_string(),
                from: JobState::Running,
                to: terminal,
            });
        }

        let id = job_id.as_str().to_string();
        let update = JobUpdate::default().with_failure(reason);

        let outcome = self
            .store
            .write("fail_and_refund", move |conn| {
                let moved = transition(conn, &id, terminal, &update, now_millis())?;
                let transitioned = moved.is_applied();
                let job = moved.into_record();

                let refund = if job.state.is_refundable() {
                    Some(refund_in(conn, &id, job.cost)?)
                } else {
                    None
                };

                let job = rows::require_job(conn, &id)?;
                Ok(FailureOutcome {
                    job,
                    transitioned,
                    refund,
                })
            })
            .await?;

        if let Some(refund) = &outcome.refund {
            self.observe_refund(job_id, refund);
        }
        Ok(outcome)
    }

    /// Cancel a queued job on behalf of its owner: `queued → failed` and
    /// refund, in one transaction.
    ///
    /// Jobs of other users are reported as not found. Jobs that already
    /// left the queue are rejected with `InvalidTransition`.
    pub async fn cancel_queued(&self, job_id: &JobId, user_id: &UserId, reason: &str) -> LedgerResult<FailureOutcome> {
        let id = job_id.as_str().to_string();
        let owner = user_id.clone();
        let update = JobUpdate::default().with_failure(reason);

        let outcome = self
            .store
            .write("cancel_job", move |conn| {
                let job = rows::require_job(conn, &id)?;
                if job.user_id != owner {
                    return Err(LedgerError::JobNotFound(id.clone()));
                }

                let moved = transition_from(
                    conn,
                    &id,
                    &[JobState::Queued],
                    JobState::Failed,
                    &update,
                    now_millis(),
                )?;
                if !moved.is_applied() {
                    return Err(LedgerError::InvalidTransition {
                        job_id: id.clone(),
                        from: moved.record().state,
                        to: JobState::Failed,
                    });
                }

                let refund = refund_in(conn, &id, job.cost)?;
                let job = rows::require_job(conn, &id)?;
                Ok(FailureOutcome {
                    job,
                    transitioned: true,
                    refund: Some(refund),
                })
            })
            .await?;

        info!(job_id = %job_id, user_id = %user_id, "Job cancelled");
        if let Some(refund) = &outcome.refund {
            self.observe_refund(job_id, refund);
        }
        Ok(outcome)
    }

    fn observe_refund(&self, job_id: &JobId, outcome: &RefundOutcome) {
        match outcome {
            RefundOutcome::Refunded { amount, balance_after } => {
                record_operation("refund", "applied");
                record_credits(TransactionKind::Refund.as_str(), *amount);
                info!(
                    job_id = %job_id,
                    credits = *amount,
                    balance_after = *balance_after,
                    "Refunded credits"
                );
            }
            RefundOutcome::AlreadyRefunded => {
                record_operation("refund", "duplicate");
                info!(job_id = %job_id, "Refund skipped: already refunded");
            }
            RefundOutcome::NotDebited => {
                record_operation("refund", "not_debited");
            }
        }
    }

    /// Credit a purchase exactly once per idempotency key.
    pub async fn apply_topup(
        &self,
        idempotency_key: &str,
        user_id: &UserId,
        amount: u64,
    ) -> LedgerResult<TopupOutcome> {
        let key = idempotency_key.to_string();
        let user = user_id.clone();
        let outcome = self
            .store
            .write("apply_topup", move |conn| {
                topup_in(conn, &key, &user, amount, TransactionKind::Topup.label())
            })
            .await?;

        match &outcome {
            TopupOutcome::Applied { balance_after } => {
                record_operation("topup", "applied");
                record_credits(TransactionKind::Topup.as_str(), amount);
                info!(
                    user_id = %user_id,
                    credits = amount,
                    balance_after = *balance_after,
                    idempotency_key,
                    "Applied top-up"
                );
            }
            TopupOutcome::Duplicate => {
                record_operation("topup", "duplicate");
                info!(user_id = %user_id, idempotency_key, "Top-up already applied");
            }
        }
        Ok(outcome)
    }

    /// Ledger history of a user, newest first.
    pub async fn history(&self, user_id: &UserId, query: HistoryQuery) -> LedgerResult<HistoryPage> {
        let user = user_id.as_str().to_string();
        self.store
            .read(move |conn| history::load_page(conn, &user, &query))
            .await
    }

    /// Refund failed jobs whose refund never committed.
    pub async fn reconcile_unrefunded(&self, limit: u32) -> LedgerResult<Vec<(JobId, RefundOutcome)>> {
        let pending = self.store.list_unrefunded_failures(limit).await?;
        let mut settled = Vec::with_capacity(pending.len());
        for job in pending {
            match self.refund(&job.id, job.cost).await {
                Ok(outcome) => settled.push((job.id, outcome)),
                Err(e) => warn!(job_id = %job.id, "Reconcile refund failed: {}", e),
            }
        }
        Ok(settled)
    }
}

// =============================================================================
// Tests
// =============================================================================
