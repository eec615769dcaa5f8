//! Ledger transaction data models.
//!
//! Every balance-affecting event is appended to the ledger as one
//! transaction. The idempotency key is unique across the ledger, so
//! replaying the same event (a retried refund, a redelivered webhook) can
//! never be applied twice.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::job::{JobId, UserId};

/// Kind of balance-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Credits taken for an accepted job
    Debit,
    /// Credits returned for a failed or timed out job
    Refund,
    /// Credits bought through the payment provider
    Topup,
}

impl TransactionKind {
    /// Returns the kind as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Refund => "refund",
            Self::Topup => "topup",
        }
    }

    /// Returns a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Debit => "Transition Generation",
            Self::Refund => "Refund",
            Self::Topup => "Credit Purchase",
        }
    }

    /// Signed effect of `amount` on the balance.
    pub fn signed(&self, amount: u64) -> i64 {
        let amount = amount as i64;
        match self {
            Self::Debit => -amount,
            Self::Refund | Self::Topup => amount,
        }
    }
}

impl FromStr for TransactionKind {
    type Err = TransactionKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "refund" => Ok(Self::Refund),
            "topup" => Ok(Self::Topup),
            _ => Err(TransactionKindParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown transaction kind: {0}")]
pub struct TransactionKindParseError(String);

/// Idempotency keys for ledger events.
pub mod idempotency {
    use crate::job::JobId;

    /// Key of the single debit a job may ever receive.
    pub fn debit(job_id: &JobId) -> String {
        format!("debit:{}", job_id)
    }

    /// Key of the single refund a job may ever receive.
    pub fn refund(job_id: &JobId) -> String {
        format!("refund:{}", job_id)
    }

    /// Key of a payment-provider event.
    pub fn topup(event_id: &str) -> String {
        format!("topup:{}", event_id)
    }
}

/// An append-only ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LedgerTransaction {
    /// Unique identifier (UUID)
    pub id: String,

    /// Unique key guarding against duplicate application
    pub idempotency_key: String,

    /// Affected user
    pub user_id: UserId,

    /// Job this transaction belongs to (debits and refunds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,

    /// Kind of event
    pub kind: TransactionKind,

    /// Unsigned amount of credits
    pub amount: u64,

    /// Balance after the transaction was applied
    pub balance_after: u64,

    /// Human-readable description
    pub description: String,

    /// When the transaction was committed
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Create a new transaction.
    pub fn new(
        idempotency_key: impl Into<String>,
        user_id: UserId,
        kind: TransactionKind,
        amount: u64,
        balance_after: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            idempotency_key: idempotency_key.into(),
            user_id,
            job_id: None,
            kind,
            amount,
            balance_after,
            description: kind.label().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Set the job ID.
    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [TransactionKind::Debit, TransactionKind::Refund, TransactionKind::Topup] {
            assert_eq!(kind.as_str().parse::<TransactionKind>().ok(), Some(kind));
        }
        assert_eq!("purchase".parse::<TransactionKind>().ok(), None);
    }

    #[test]
    fn test_signed_amounts() {
        assert_eq!(TransactionKind::Debit.signed(5), -5);
        assert_eq!(TransactionKind::Refund.signed(5), 5);
        assert_eq!(TransactionKind::Topup.signed(100), 100);
    }

    #[test]
    fn test_idempotency_keys_are_distinct_per_kind() {
        let job_id = JobId::from_string("job-1");
        assert_ne!(idempotency::debit(&job_id), idempotency::refund(&job_id));
        assert_eq!(idempotency::topup("evt_123"), "topup:evt_123");
    }

    #[test]
    fn test_builder() {
        let tx = LedgerTransaction::new(
            "debit:job-1",
            UserId::new("user123"),
            TransactionKind::Debit,
            5,
            95,
        )
        .with_job_id(JobId::from_string("job-1"));

        assert_eq!(tx.description, "Transition Generation");
        assert_eq!(tx.job_id.unwrap().as_str(), "job-1");
    }
}
