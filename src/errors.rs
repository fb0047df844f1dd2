use std::time::Duration;

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Error taxonomy for the sync engine. Every remote or store failure is
/// mapped into one of these variants; nothing unwinds except `Fatal`.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("remote not configured")]
    NotConfigured,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("application error {code}: {message}")]
    Application { code: u16, message: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl SyncError {
    /// Item-level errors mark the item `error` and let the run continue.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            SyncError::Malformed(_) | SyncError::Application { .. } | SyncError::Conflict(_)
        )
    }

    /// Failures that leave the item in its prior sync state while the run
    /// moves on; the next run picks the item up again. A rate limit with a
    /// retry-after hint is excluded: that aborts the whole run instead.
    pub fn is_item_retry(&self) -> bool {
        matches!(
            self,
            SyncError::Transient(_) | SyncError::RateLimited { retry_after: None }
        )
    }

    pub fn transient(err: impl std::fmt::Display) -> Self {
        SyncError::Transient(err.to_string())
    }

    pub fn fatal(err: impl std::fmt::Display) -> Self {
        SyncError::Fatal(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            // A unique-constraint hit means "already present" to the engine.
            if db.message().contains("UNIQUE constraint failed") {
                return SyncError::Conflict(db.message().to_string());
            }
        }
        SyncError::Fatal(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Malformed(err.to_string())
        } else {
            // Timeouts, DNS, TCP resets, TLS failures.
            SyncError::Transient(err.to_string())
        }
    }
}

/// Truncates an error string for persistence next to the failed item.
pub fn truncate_error(message: &str) -> String {
    const MAX: usize = 500;
    if message.chars().count() <= MAX {
        message.to_string()
    } else {
        message.chars().take(MAX).collect()
    }
}
