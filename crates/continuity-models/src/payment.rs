//! Payment notification data.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::UserId;

/// A verified credit purchase reported by the payment provider.
///
/// Only ever built from a payload whose signature has been checked; the
/// credit amount never comes from client-supplied request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PaymentEvent {
    /// Provider-assigned event identifier, stable across redeliveries
    pub event_id: String,
    /// Account to credit
    pub user_id: UserId,
    /// Credits purchased
    pub credit_amount: u64,
}
