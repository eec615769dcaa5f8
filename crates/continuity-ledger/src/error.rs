//! Ledger error types.

use thiserror::Error;

use continuity_models::JobState;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job already exists: {0}")]
    JobExists(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },

    #[error("Refund rejected for job {job_id}: {reason}")]
    RefundRejected { job_id: String, reason: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Ledger lock contention: {0}")]
    LockContention(String),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("Invalid cursor")]
    InvalidCursor,

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked) => {
                LedgerError::LockContention(err.to_string())
            }
            _ => LedgerError::Sqlite(err),
        }
    }
}

impl LedgerError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }

    /// Only lock contention is retried; the operation never proceeds unlocked.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockContention(_))
    }

    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, LedgerError::InsufficientFunds { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LedgerError::UserNotFound(_) | LedgerError::JobNotFound(_))
    }
}
