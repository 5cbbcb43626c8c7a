//! Error types for the payment forwarder.

use std::time::Duration;

use ledger_core::{LedgerError, StoreError};
use thiserror::Error;

use crate::destination::{Capability, DestinationKind};
use crate::forwarding::{AttemptState, ForwardingAttempt};

/// Problems with the merchant's configured destination.
///
/// These are fatal until the merchant reconfigures; they are never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No destination is configured.
    #[error("no active destination configured")]
    NoActiveDestination,

    /// The destination lacks a capability it needs to receive forwarded funds.
    #[error("{destination} destination is missing required capability {capability}")]
    MissingCapability {
        destination: DestinationKind,
        capability: String,
    },

    /// The configuration could not be read.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur while coordinating a payment.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// The destination configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// A ledger or network blip that outlived the retry bound.
    #[error("transient ledger error: {0}")]
    TransientIo(#[source] LedgerError),

    /// Forwarding failed after settlement. Funds remain on the custodial
    /// account and need manual resolution.
    #[error("forwarding failed for invoice {} after {} attempt(s): {source}", attempt.invoice_hash, attempt.attempt_count)]
    TerminalForwarding {
        attempt: Box<ForwardingAttempt>,
        #[source]
        source: LedgerError,
    },

    /// The destination does not support the requested operation.
    #[error("{destination} destination does not support {operation}")]
    UnsupportedOperation {
        operation: Capability,
        destination: DestinationKind,
    },

    /// Invoice amounts must be positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),

    /// The custodial ledger refused to issue the invoice.
    #[error("invoice creation failed: {0}")]
    InvoiceCreationFailed(#[source] LedgerError),

    /// An invoice is already outstanding; close it first.
    #[error("an invoice session is already open for {0}")]
    SessionAlreadyOpen(String),

    /// There is no invoice session to operate on.
    #[error("no invoice session is open")]
    NoOpenSession,

    /// No forwarding attempt was ever recorded for this invoice.
    #[error("no forwarding attempt recorded for invoice {0}")]
    UnknownInvoice(String),

    /// A forwarding attempt for this invoice already exists.
    #[error("invoice {invoice_hash} already has a forwarding attempt in state {state:?}")]
    DuplicateForward {
        invoice_hash: String,
        state: AttemptState,
    },

    /// A read-only query did not finish in time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The memo store failed.
    #[error("memo store error: {0}")]
    Store(#[from] StoreError),
}

/// Coarse category of a [`ForwarderError`], for rendering and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fix the configuration; retrying will not help.
    Configuration,
    /// Retry later.
    TransientIo,
    /// Funds are stuck on the custodial account.
    TerminalForwarding,
    /// Capability absent for the destination.
    UnsupportedOperation,
    /// The caller asked for something invalid in the current state.
    InvalidRequest,
}

impl ForwarderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForwarderError::Configuration(_) => ErrorKind::Configuration,
            ForwarderError::TransientIo(_)
            | ForwarderError::Timeout(_)
            | ForwarderError::Store(_) => ErrorKind::TransientIo,
            ForwarderError::InvoiceCreationFailed(source) if source.is_transient() => {
                ErrorKind::TransientIo
            }
            ForwarderError::InvoiceCreationFailed(_) => ErrorKind::InvalidRequest,
            ForwarderError::TerminalForwarding { .. } => ErrorKind::TerminalForwarding,
            ForwarderError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            ForwarderError::InvalidAmount(_)
            | ForwarderError::SessionAlreadyOpen(_)
            | ForwarderError::NoOpenSession
            | ForwarderError::UnknownInvoice(_)
            | ForwarderError::DuplicateForward { .. } => ErrorKind::InvalidRequest,
        }
    }

    /// The attempt history, if this is a forwarding failure.
    pub fn attempt(&self) -> Option<&ForwardingAttempt> {
        match self {
            ForwarderError::TerminalForwarding { attempt, .. } => Some(attempt),
            _ => None,
        }
    }
}

/// Result type for forwarder operations.
pub type Result<T> = std::result::Result<T, ForwarderError>;
