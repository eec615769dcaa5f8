//! Credit balance and ledger history handlers.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use continuity_ledger::{HistoryQuery, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use continuity_models::{JobId, LedgerTransaction, TransactionKind, UserId};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: UserId,
    pub balance: u64,
}

/// Query parameters for the history endpoint.
#[derive(Debug, Deserialize)]
pub struct CreditHistoryQuery {
    /// Page size (clamped to 1..=100).
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Opaque cursor from the previous page.
    pub cursor: Option<String>,
    /// One of `debit`, `refund`, `topup`.
    pub kind: Option<String>,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn parse_kind(kind: &str) -> ApiResult<TransactionKind> {
    kind.trim().parse::<TransactionKind>().map_err(|_| {
        ApiError::bad_request(format!(
            "Invalid kind '{}'. Must be one of: debit, refund, topup",
            kind
        ))
    })
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: String,
    pub kind: TransactionKind,
    pub amount: u64,
    /// Balance change, negative for debits
    pub delta: i64,
    pub balance_after: u64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub created_at: DateTime<Utc>,
}

impl From<LedgerTransaction> for TransactionResponse {
    fn from(tx: LedgerTransaction) -> Self {
        Self {
            delta: tx.kind.signed(tx.amount),
            id: tx.id,
            kind: tx.kind,
            amount: tx.amount,
            balance_after: tx.balance_after,
            description: tx.description,
            job_id: tx.job_id,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreditHistoryResponse {
    pub transactions: Vec<TransactionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Current balance of the caller.
pub async fn get_balance(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.manager.accounting().balance(&user.user_id).await?;
    Ok(Json(BalanceResponse {
        user_id: user.user_id,
        balance,
    }))
}

/// Ledger history of the caller, newest first.
pub async fn get_credit_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<CreditHistoryQuery>,
) -> ApiResult<Json<CreditHistoryResponse>> {
    let kind = query.kind.as_deref().map(parse_kind).transpose()?;

    let page = state
        .manager
        .accounting()
        .history(
            &user.user_id,
            HistoryQuery {
                limit: Some(query.limit.clamp(1, MAX_PAGE_SIZE)),
                cursor: query.cursor.filter(|c| !c.is_empty()),
                kind,
            },
        )
        .await?;

    Ok(Json(CreditHistoryResponse {
        transactions: page
            .transactions
            .into_iter()
            .map(TransactionResponse::from)
            .collect(),
        next_cursor: page.next_cursor,
    }))
}
