//! Job ledger and credit accounting.
//!
//! This crate provides:
//! - A SQLite ledger store with immediate (write-locked) transactions
//! - The accounting engine: debit, refund and top-up, each exactly once
//! - Compare-and-set job state changes and recovery queries
//! - Paginated, append-only transaction history
//! - Lock-contention retry and ledger metrics

pub mod accounting;
pub mod config;
pub mod error;
pub mod history;
pub mod jobs;
pub mod metrics;
pub mod retry;
mod rows;
pub mod schema;
pub mod store;

pub use accounting::{AccountingEngine, DebitToken, FailureOutcome, RefundOutcome, TopupOutcome};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use history::{HistoryPage, HistoryQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use jobs::{JobUpdate, Transition};
pub use retry::RetryConfig;
pub use store::LedgerStore;
