//! User credit account.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::UserId;

/// A user's credit account. The balance never goes negative.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UserAccount {
    pub id: UserId,
    pub balance: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_afford(&self, amount: u64) -> bool {
        self.balance >= amount
    }
}
