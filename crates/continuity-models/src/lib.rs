//! Shared data models for the Continuity backend.
//!
//! This crate provides Serde-serializable types for:
//! - Transition jobs and their lifecycle state machine
//! - Job inputs and artifact references
//! - User credit accounts and append-only ledger transactions
//! - Credit cost calculation
//! - Generation status and payment notifications

pub mod account;
pub mod credit_cost;
pub mod generation;
pub mod inputs;
pub mod job;
pub mod ledger_transaction;
pub mod payment;

// Re-export common types
pub use account::UserAccount;
pub use credit_cost::{CostBreakdown, TransitionCostCalculator, AUDIO_ADDON_COST, TRANSITION_BASE_COST};
pub use generation::GenerationStatus;
pub use inputs::{ArtifactRef, JobInputs, DEFAULT_DURATION_SECONDS};
pub use job::{JobId, JobRecord, JobState, JobStateParseError, OperationHandle, UserId};
pub use ledger_transaction::{idempotency, LedgerTransaction, TransactionKind, TransactionKindParseError};
pub use payment::PaymentEvent;
