//! Ledger schema.
//!
//! `ledger_transactions` is append-only: rows are inserted, never updated or
//! deleted. Its unique `idempotency_key` is what makes replays no-ops.

use rusqlite::Connection;

use crate::error::LedgerResult;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id              TEXT PRIMARY KEY,
    balance         INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at_ms   INTEGER NOT NULL,
    updated_at_ms   INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id                     TEXT PRIMARY KEY,
    user_id                TEXT NOT NULL REFERENCES users(id),
    cost                   INTEGER NOT NULL CHECK (cost >= 0),
    state                  TEXT NOT NULL,
    inputs_json            TEXT NOT NULL,
    debited                INTEGER NOT NULL DEFAULT 0,
    refunded               INTEGER NOT NULL DEFAULT 0,
    operation_handle       TEXT,
    generated_ref          TEXT,
    output_ref             TEXT,
    progress               INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    last_message           TEXT,
    failure_reason         TEXT,
    running_started_at_ms  INTEGER,
    deadline_at_ms         INTEGER,
    created_at_ms          INTEGER NOT NULL,
    updated_at_ms          INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_state_created ON jobs(state, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_jobs_user_created ON jobs(user_id, created_at_ms);

CREATE TABLE IF NOT EXISTS ledger_transactions (
    id               TEXT PRIMARY KEY,
    idempotency_key  TEXT NOT NULL UNIQUE,
    user_id          TEXT NOT NULL REFERENCES users(id),
    job_id           TEXT,
    kind             TEXT NOT NULL,
    amount           INTEGER NOT NULL CHECK (amount >= 0),
    balance_after    INTEGER NOT NULL CHECK (balance_after >= 0),
    description      TEXT NOT NULL,
    created_at_ms    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_user_created ON ledger_transactions(user_id, created_at_ms);
";

/// Job columns added after the first release, with their definitions.
const ADDED_JOB_COLUMNS: [(&str, &str); 3] = [
    ("generated_ref", "TEXT"),
    ("progress", "INTEGER NOT NULL DEFAULT 0"),
    ("last_message", "TEXT"),
];

/// Create tables and indexes if they do not exist yet, and add columns
/// missing from databases created by older builds.
pub fn init_schema(conn: &Connection) -> LedgerResult<()> {
    conn.execute_batch(SCHEMA)?;

    let existing = job_columns(conn)?;
    for (name, definition) in ADDED_JOB_COLUMNS {
        if !existing.iter().any(|column| column == name) {
            conn.execute_batch(&format!("ALTER TABLE jobs ADD COLUMN {} {}", name, definition))?;
        }
    }
    Ok(())
}

fn job_columns(conn: &Connection) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA table_info(jobs)")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}
