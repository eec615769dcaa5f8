//! Ledger configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryConfig;

/// Ledger store configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// SQLite database file
    pub db_path: PathBuf,
    /// How long a connection blocks on a held write lock before reporting busy
    pub busy_timeout: Duration,
    /// Retry policy once `busy_timeout` is exceeded
    pub lock_retry: RetryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/continuity.db"),
            busy_timeout: Duration::from_secs(5),
            lock_retry: RetryConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("LEDGER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/continuity.db")),
            busy_timeout: Duration::from_millis(
                std::env::var("LEDGER_BUSY_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5000),
            ),
            lock_retry: RetryConfig::from_env(),
        }
    }

    /// Config for a database at `path` with default timeouts.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: path.into(),
            ..Self::default()
        }
    }
}
