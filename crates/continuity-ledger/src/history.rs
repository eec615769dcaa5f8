//! Paginated ledger history.
//!
//! Pages are ordered newest first by `(created_at_ms, id)`. The cursor is
//! the position of the last row of the previous page, encoded as URL-safe
//! base64 so clients treat it as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rusqlite::{params, Connection};

use continuity_models::{LedgerTransaction, TransactionKind};

use crate::error::{LedgerError, LedgerResult};
use crate::rows::{self, to_millis, TRANSACTION_COLUMNS};

/// Default page size.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// History query parameters.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Page size, clamped to `1..=MAX_PAGE_SIZE` (default `DEFAULT_PAGE_SIZE`)
    pub limit: Option<u32>,
    /// Cursor from a previous page
    pub cursor: Option<String>,
    /// Restrict to one transaction kind
    pub kind: Option<TransactionKind>,
}

/// One page of history.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub transactions: Vec<LedgerTransaction>,
    /// Cursor for the next page, `None` on the last page
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Position {
    created_at_ms: i64,
    id: String,
}

fn encode_cursor(position: &Position) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}:{}", position.created_at_ms, position.id))
}

fn decode_cursor(cursor: &str) -> LedgerResult<Position> {
    let raw = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| LedgerError::InvalidCursor)?;
    let text = String::from_utf8(raw).map_err(|_| LedgerError::InvalidCursor)?;
    let (ms, id) = text.split_once(':').ok_or(LedgerError::InvalidCursor)?;
    let created_at_ms = ms.parse().map_err(|_| LedgerError::InvalidCursor)?;
    if id.is_empty() {
        return Err(LedgerError::InvalidCursor);
    }
    Ok(Position {
        created_at_ms,
        id: id.to_string(),
    })
}

pub(crate) fn load_page(conn: &Connection, user_id: &str, query: &HistoryQuery) -> LedgerResult<HistoryPage> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let position = query.cursor.as_deref().map(decode_cursor).transpose()?;
    let (after_ms, after_id) = match &position {
        Some(p) => (Some(p.created_at_ms), Some(p.id.as_str())),
        None => (None, None),
    };

    let sql = format!(
        "SELECT {} FROM ledger_transactions
         WHERE user_id = ?1
           AND (?2 IS NULL OR created_at_ms < ?2 OR (created_at_ms = ?2 AND id < ?3))
           AND (?4 IS NULL OR kind = ?4)
         ORDER BY created_at_ms DESC, id DESC
         LIMIT ?5",
        TRANSACTION_COLUMNS
    );

    // One extra row tells us whether another page exists.
    let mut transactions = rows::query_transactions(
        conn,
        &sql,
        params![
            user_id,
            after_ms,
            after_id,
            query.kind.map(|k| k.as_str()),
            limit + 1
        ],
    )?;

    let next_cursor = if transactions.len() > limit as usize {
        transactions.truncate(limit as usize);
        transactions.last().map(|tx| {
            encode_cursor(&Position {
                created_at_ms: to_millis(tx.created_at),
                id: tx.id.clone(),
            })
        })
    } else {
        None
    };

    Ok(HistoryPage {
        transactions,
        next_cursor,
    })
}
