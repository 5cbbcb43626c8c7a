//! Error types for ledger-client.

use ledger_core::LedgerError;
use thiserror::Error;

/// Errors that can occur when talking to the custodial ledger.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The ledger answered with a non-success status.
    #[error("ledger returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The requested transfer target does not exist on the ledger.
    #[error("unknown transfer target: {0}")]
    UnknownTarget(String),

    /// SSE stream error.
    #[error("SSE error: {0}")]
    Sse(String),

    /// Daemon health check failed.
    #[error("Health check failed")]
    HealthCheckFailed,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Missing required environment variable.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

impl From<ClientError> for LedgerError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(e) => {
                if e.is_timeout() {
                    LedgerError::Timeout
                } else if let Some(status) = e.status() {
                    status_to_ledger_error(status.as_u16(), e.to_string())
                } else {
                    LedgerError::Transport(e.to_string())
                }
            }
            ClientError::Json(e) => LedgerError::Rejected(format!("malformed response: {}", e)),
            ClientError::Status { status, message } => status_to_ledger_error(status, message),
            ClientError::UnknownTarget(target) => LedgerError::Unreachable(target),
            ClientError::Sse(message) => LedgerError::Transport(message),
            ClientError::HealthCheckFailed => {
                LedgerError::Transport("health check failed".to_string())
            }
            ClientError::Config(message) | ClientError::MissingEnvVar(message) => {
                LedgerError::Rejected(message)
            }
        }
    }
}

/// Map an HTTP status onto the ledger error taxonomy.
pub(crate) fn status_to_ledger_error(status: u16, message: String) -> LedgerError {
    match status {
        401 | 403 => LedgerError::Unauthorized(message),
        404 => LedgerError::InvoiceNotFound(message),
        408 | 504 => LedgerError::Timeout,
        429 => LedgerError::RateLimited,
        500..=599 => LedgerError::Transport(message),
        _ => LedgerError::Rejected(message),
    }
}
