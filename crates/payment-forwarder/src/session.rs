//! One outstanding invoice and its lifecycle.

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use ledger_core::CustodialLedger;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::destination::DestinationKind;
use crate::error::{ForwarderError, Result};
use crate::events::{EventBus, EventGate, PaymentEvent};

/// Lifecycle of an [`Invoice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    /// Waiting for payment.
    Open,
    /// Settlement detected.
    Paid,
    Forwarding,
    Forwarded,
    /// Forwarding failed; funds are on the custodial account.
    ForwardingFailed,
    /// The invoice lapsed unpaid.
    Expired,
    /// The session was closed before payment.
    Closed,
}

impl InvoiceState {
    /// Whether the session has nothing left to do.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            InvoiceState::Forwarded
                | InvoiceState::ForwardingFailed
                | InvoiceState::Expired
                | InvoiceState::Closed
        )
    }
}

/// An invoice issued on the custodial ledger for one merchant payment.
///
/// Immutable once created except for `state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub payment_request: String,
    pub payment_hash: String,
    pub amount_minor: u64,
    pub memo: String,
    pub destination: DestinationKind,
    pub created_at: i64,
    pub expires_at: i64,
    pub state: InvoiceState,
}

impl Invoice {
    /// Time left until expiry, zero if already past.
    pub fn expires_in(&self) -> Duration {
        let remaining = self.expires_at - Utc::now().timestamp();
        Duration::from_secs(remaining.max(0) as u64)
    }
}

/// Owns an invoice, its expected-hash registration and the authority to
/// stop event emission for it.
pub struct InvoiceSession {
    invoice: Mutex<Invoice>,
    cancel: watch::Sender<bool>,
    gate: EventGate,
}

impl InvoiceSession {
    /// Issue an invoice on the custodial ledger.
    ///
    /// The invoice is always issued on the shared account, whatever the
    /// destination. Failures are returned as-is and never retried here; a
    /// caller that wants to retry opens a fresh session.
    pub async fn open(
        ledger: &dyn CustodialLedger,
        amount_minor: i64,
        memo: &str,
        destination: DestinationKind,
        default_expiry: Duration,
        events: &EventBus,
    ) -> Result<Self> {
        if amount_minor <= 0 {
            return Err(ForwarderError::InvalidAmount(amount_minor));
        }
        let amount = amount_minor as u64;

        let created = ledger.create_invoice(amount, memo).await.map_err(|e| {
            warn!(ledger = ledger.name(), "Invoice creation failed: {}", e);
            ForwarderError::InvoiceCreationFailed(e)
        })?;

        let created_at = Utc::now().timestamp();
        let expires_at = created
            .expires_at
            .unwrap_or(created_at + default_expiry.as_secs() as i64);

        let invoice = Invoice {
            payment_request: created.payment_request,
            payment_hash: created.payment_hash,
            amount_minor: amount,
            memo: memo.to_string(),
            destination,
            created_at,
            expires_at,
            state: InvoiceState::Open,
        };

        info!(
            payment_hash = %invoice.payment_hash,
            amount_minor = amount,
            destination = %destination,
            "Opened invoice session"
        );

        let (cancel, _) = watch::channel(false);
        Ok(Self {
            gate: EventGate::new(events.clone(), invoice.payment_hash.clone()),
            invoice: Mutex::new(invoice),
            cancel,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Invoice> {
        self.invoice.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the invoice.
    pub fn invoice(&self) -> Invoice {
        self.lock().clone()
    }

    /// The only hash this session reacts to.
    pub fn expected_hash(&self) -> String {
        self.lock().payment_hash.clone()
    }

    pub fn state(&self) -> InvoiceState {
        self.lock().state
    }

    pub(crate) fn set_state(&self, state: InvoiceState) {
        self.lock().state = state;
    }

    /// A receiver that flips to `true` when the session closes.
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.cancel.borrow()
    }

    pub(crate) fn emit(&self, event: PaymentEvent) -> bool {
        self.gate.emit(event)
    }

    /// Close the session. Safe to call repeatedly.
    ///
    /// No event for this session is published once this returns, and any
    /// detection armed with [`cancelled`](Self::cancelled) stops.
    pub fn close(&self) {
        self.gate.close();
        let was_open = !self.cancel.send_replace(true);

        let mut invoice = self.lock();
        if invoice.state == InvoiceState::Open {
            invoice.state = InvoiceState::Closed;
        }
        if was_open {
            info!(payment_hash = %invoice.payment_hash, state = ?invoice.state, "Closed invoice session");
        }
    }
}
