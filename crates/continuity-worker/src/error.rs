//! Worker error types.

use thiserror::Error;

use continuity_ledger::LedgerError;
use continuity_models::JobState;

use crate::capabilities::CapabilityError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid job inputs: {0}")]
    InvalidInput(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Too many consecutive poll failures: {0}")]
    PollFailures(String),

    #[error("Job was already moved to {0} by another actor")]
    Superseded(JobState),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Capability(e) => e.is_retryable(),
            WorkerError::Ledger(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }

    /// Whether the failure came from insufficient credits.
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, WorkerError::Ledger(e) if e.is_insufficient_funds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(WorkerError::from(CapabilityError::transient("503")).is_retryable());
        assert!(!WorkerError::from(CapabilityError::permanent("400")).is_retryable());
        assert!(WorkerError::from(LedgerError::LockContention("busy".into())).is_retryable());
        assert!(!WorkerError::GenerationFailed("blocked".into()).is_retryable());
    }

    #[test]
    fn test_insufficient_funds() {
        let err = WorkerError::from(LedgerError::InsufficientFunds {
            available: 1,
            requested: 5,
        });
        assert!(err.is_insufficient_funds());
        assert!(!WorkerError::invalid_input("prompt: empty").is_insufficient_funds());
    }
}
