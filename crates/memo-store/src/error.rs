//! Memo store error types.

use ledger_core::StoreError;
use thiserror::Error;

/// Errors that can occur during memo store operations.
#[derive(Debug, Error)]
pub enum MemoStoreError {
    /// SQLx error (connection, query, etc.)
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl From<MemoStoreError> for StoreError {
    fn from(err: MemoStoreError) -> Self {
        match err {
            MemoStoreError::Sqlx(sqlx::Error::PoolClosed) => StoreError::Closed,
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Result type for memo store operations.
pub type Result<T> = std::result::Result<T, MemoStoreError>;
