//! Error types shared by every collaborator.

use thiserror::Error;

/// Errors reported by a custodial ledger or a remote wallet.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The backend asked us to slow down.
    #[error("rate limited")]
    RateLimited,

    /// Network or server-side failure that may succeed on retry.
    #[error("transport error: {0}")]
    Transport(String),

    /// Credentials were rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The destination wallet or address cannot be reached.
    #[error("destination unreachable: {0}")]
    Unreachable(String),

    /// No invoice with the given hash is known to the backend.
    #[error("invoice not found: {0}")]
    InvoiceNotFound(String),

    /// The paying account does not hold enough funds.
    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: u64, requested: u64 },

    /// The backend refused the request for a reason it explained.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend does not implement this method.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl LedgerError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout | LedgerError::RateLimited | LedgerError::Transport(_)
        )
    }
}

/// Errors from a persistent key-value store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The store has been closed.
    #[error("store closed")]
    Closed,
}
