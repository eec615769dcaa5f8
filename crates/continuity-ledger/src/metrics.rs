//! Ledger metrics collection.
//!
//! Provides standardized metrics for monitoring balance mutations:
//! - Operation counters by operation and outcome
//! - Credit volume counters by transaction kind
//! - Lock retry counters

use metrics::counter;

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Ledger operations by operation and outcome.
    pub const OPERATIONS_TOTAL: &str = "ledger_operations_total";

    /// Credits moved, by transaction kind.
    pub const CREDITS_TOTAL: &str = "ledger_credits_total";

    /// Lock contention retries by operation.
    pub const LOCK_RETRIES_TOTAL: &str = "ledger_lock_retries_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record the outcome of a ledger operation.
pub fn record_operation(operation: &str, outcome: &str) {
    counter!(
        names::OPERATIONS_TOTAL,
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record credits moved by an applied transaction.
pub fn record_credits(kind: &str, amount: u64) {
    counter!(names::CREDITS_TOTAL, "kind" => kind.to_string()).increment(amount);
}

/// Record a lock contention retry.
pub fn record_lock_retry(operation: &str) {
    counter!(
        names::LOCK_RETRIES_TOTAL,
        "operation" => operation.to_string()
    )
    .increment(1);
}
