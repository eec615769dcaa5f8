//! Row mapping and statement helpers shared by the job queries and the
//! accounting engine. All functions run on a borrowed connection, usually
//! the open write transaction.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use continuity_models::{
    JobId, JobInputs, JobRecord, JobState, LedgerTransaction, OperationHandle, TransactionKind,
    UserAccount, UserId,
};

use crate::error::{LedgerError, LedgerResult};

pub(crate) const JOB_COLUMNS: &str = "id, user_id, cost, state, inputs_json, debited, refunded, \
     operation_handle, output_ref, failure_reason, running_started_at_ms, deadline_at_ms, \
     created_at_ms, updated_at_ms, generated_ref, progress, last_message";

pub(crate) const TRANSACTION_COLUMNS: &str =
    "id, idempotency_key, user_id, job_id, kind, amount, balance_after, description, created_at_ms";

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

pub(crate) fn to_i64(value: u64) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::invalid_amount(format!("{} out of range", value)))
}

fn to_u64(value: i64, column: &str) -> LedgerResult<u64> {
    u64::try_from(value).map_err(|_| LedgerError::corrupt(format!("negative {}: {}", column, value)))
}

// =============================================================================
// Users
// =============================================================================

pub(crate) fn load_user(conn: &Connection, user_id: &str) -> LedgerResult<Option<UserAccount>> {
    let row = conn
        .query_row(
            "SELECT id, balance, created_at_ms, updated_at_ms FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, balance, created, updated)| {
        Ok(UserAccount {
            id: UserId::new(id),
            balance: to_u64(balance, "balance")?,
            created_at: from_millis(created),
            updated_at: from_millis(updated),
        })
    })
    .transpose()
}

/// Insert the user with a zero balance unless it already exists.
pub(crate) fn ensure_user(conn: &Connection, user_id: &str, now_ms: i64) -> LedgerResult<UserAccount> {
    conn.execute(
        "INSERT OR IGNORE INTO users (id, balance, created_at_ms, updated_at_ms) VALUES (?1, 0, ?2, ?2)",
        params![user_id, now_ms],
    )?;
    load_user(conn, user_id)?.ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))
}

pub(crate) fn set_balance(conn: &Connection, user_id: &str, balance: u64, now_ms: i64) -> LedgerResult<()> {
    conn.execute(
        "UPDATE users SET balance = ?2, updated_at_ms = ?3 WHERE id = ?1",
        params![user_id, to_i64(balance)?, now_ms],
    )?;
    Ok(())
}

// =============================================================================
// Jobs
// =============================================================================

struct JobRow {
    id: String,
    user_id: String,
    cost: i64,
    state: String,
    inputs_json: String,
    debited: bool,
    refunded: bool,
    operation_handle: Option<String>,
    output_ref: Option<String>,
    failure_reason: Option<String>,
    running_started_at_ms: Option<i64>,
    deadline_at_ms: Option<i64>,
    created_at_ms: i64,
    updated_at_ms: i64,
    generated_ref: Option<String>,
    progress: i64,
    last_message: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            cost: row.get(2)?,
            state: row.get(3)?,
            inputs_json: row.get(4)?,
            debited: row.get(5)?,
            refunded: row.get(6)?,
            operation_handle: row.get(7)?,
            output_ref: row.get(8)?,
            failure_reason: row.get(9)?,
            running_started_at_ms: row.get(10)?,
            deadline_at_ms: row.get(11)?,
            created_at_ms: row.get(12)?,
            updated_at_ms: row.get(13)?,
            generated_ref: row.get(14)?,
            progress: row.get(15)?,
            last_message: row.get(16)?,
        })
    }

    fn into_record(self) -> LedgerResult<JobRecord> {
        let state: JobState = self
            .state
            .parse()
            .map_err(|e| LedgerError::corrupt(format!("job {}: {}", self.id, e)))?;
        let inputs: JobInputs = serde_json::from_str(&self.inputs_json)?;

        Ok(JobRecord {
            id: JobId::from_string(self.id),
            user_id: UserId::new(self.user_id),
            cost: to_u64(self.cost, "cost")?,
            state,
            inputs,
            debited: self.debited,
            refunded: self.refunded,
            operation_handle: self.operation_handle.map(OperationHandle::new),
            generated_ref: self.generated_ref,
            output_ref: self.output_ref,
            progress: u8::try_from(self.progress.clamp(0, 100)).unwrap_or(0),
            last_message: self.last_message,
            failure_reason: self.failure_reason,
            running_started_at: self.running_started_at_ms.map(from_millis),
            deadline_at: self.deadline_at_ms.map(from_millis),
            created_at: from_millis(self.created_at_ms),
            updated_at: from_millis(self.updated_at_ms),
        })
    }
}

pub(crate) fn load_job(conn: &Connection, job_id: &str) -> LedgerResult<Option<JobRecord>> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    conn.query_row(&sql, params![job_id], JobRow::from_row)
        .optional()?
        .map(JobRow::into_record)
        .transpose()
}

pub(crate) fn require_job(conn: &Connection, job_id: &str) -> LedgerResult<JobRecord> {
    load_job(conn, job_id)?.ok_or_else(|| LedgerError::JobNotFound(job_id.to_string()))
}

/// Run a job query whose select list is `JOB_COLUMNS`.
pub(crate) fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> LedgerResult<Vec<JobRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, JobRow::from_row)?;
    let mut jobs = Vec::new();
    for row in rows {
        jobs.push(row?.into_record()?);
    }
    Ok(jobs)
}

pub(crate) fn insert_job(conn: &Connection, job: &JobRecord) -> LedgerResult<()> {
    let inputs_json = serde_json::to_string(&job.inputs)?;
    let sql = format!(
        "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        JOB_COLUMNS
    );
    let inserted = conn.execute(
        &sql,
        params![
            job.id.as_str(),
            job.user_id.as_str(),
            to_i64(job.cost)?,
            job.state.as_str(),
            inputs_json,
            job.debited,
            job.refunded,
            job.operation_handle.as_ref().map(|h| h.as_str()),
            job.output_ref,
            job.failure_reason,
            job.running_started_at.map(to_millis),
            job.deadline_at.map(to_millis),
            to_millis(job.created_at),
            to_millis(job.updated_at),
            job.generated_ref,
            job.progress.min(100),
            job.last_message,
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            Err(LedgerError::JobExists(job.id.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

// =============================================================================
// Ledger transactions
// =============================================================================

pub(crate) fn transaction_exists(conn: &Connection, idempotency_key: &str) -> LedgerResult<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM ledger_transactions WHERE idempotency_key = ?1",
            params![idempotency_key],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Append a transaction. Returns `false` if the idempotency key was already
/// used, in which case nothing was written.
pub(crate) fn append_transaction(conn: &Connection, tx: &LedgerTransaction) -> LedgerResult<bool> {
    let sql = format!(
        "INSERT OR IGNORE INTO ledger_transactions ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        TRANSACTION_COLUMNS
    );
    let inserted = conn.execute(
        &sql,
        params![
            tx.id,
            tx.idempotency_key,
            tx.user_id.as_str(),
            tx.job_id.as_ref().map(|j| j.as_str()),
            tx.kind.as_str(),
            to_i64(tx.amount)?,
            to_i64(tx.balance_after)?,
            tx.description,
            to_millis(tx.created_at),
        ],
    )?;
    Ok(inserted == 1)
}

struct TransactionRow {
    id: String,
    idempotency_key: String,
    user_id: String,
    job_id: Option<String>,
    kind: String,
    amount: i64,
    balance_after: i64,
    description: String,
    created_at_ms: i64,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            idempotency_key: row.get(1)?,
            user_id: row.get(2)?,
            job_id: row.get(3)?,
            kind: row.get(4)?,
            amount: row.get(5)?,
            balance_after: row.get(6)?,
            description: row.get(7)?,
            created_at_ms: row.get(8)?,
        })
    }

    fn into_transaction(self) -> LedgerResult<LedgerTransaction> {
        let kind: TransactionKind = self
            .kind
            .parse()
            .map_err(|e| LedgerError::corrupt(format!("transaction {}: {}", self.id, e)))?;
        Ok(LedgerTransaction {
            id: self.id,
            idempotency_key: self.idempotency_key,
            user_id: UserId::new(self.user_id),
            job_id: self.job_id.map(JobId::from_string),
            kind,
            amount: to_u64(self.amount, "amount")?,
            balance_after: to_u64(self.balance_after, "balance_after")?,
            description: self.description,
            created_at: from_millis(self.created_at_ms),
        })
    }
}

/// Run a transaction query whose select list is `TRANSACTION_COLUMNS`.
pub(crate) fn query_transactions(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> LedgerResult<Vec<LedgerTransaction>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, TransactionRow::from_row)?;
    let mut transactions = Vec::new();
    for row in rows {
        transactions.push(row?.into_transaction()?);
    }
    Ok(transactions)
}
