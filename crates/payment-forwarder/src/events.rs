//! Events delivered to callers and the status they can render.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use crate::forwarding::ForwardingAttempt;

/// Something a caller should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentEvent {
    /// The invoice was paid. Delivered at most once per payment hash.
    Paid {
        invoice_hash: String,
        amount_minor: u64,
        memo: String,
    },

    /// Funds reached the merchant's destination.
    Forwarded { attempt: ForwardingAttempt },

    /// Forwarding failed terminally; funds remain on the custodial account.
    ForwardingFailed {
        attempt: ForwardingAttempt,
        error: String,
    },
}

impl PaymentEvent {
    pub fn invoice_hash(&self) -> &str {
        match self {
            PaymentEvent::Paid { invoice_hash, .. } => invoice_hash,
            PaymentEvent::Forwarded { attempt } | PaymentEvent::ForwardingFailed { attempt, .. } => {
                &attempt.invoice_hash
            }
        }
    }
}

/// What a caller should show for the current payment.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentStatus {
    /// No invoice outstanding.
    Idle,
    /// Payment not yet received.
    AwaitingPayment { invoice_hash: String },
    /// Payment received, forwarding.
    Forwarding { invoice_hash: String },
    /// Funds delivered.
    Forwarded { attempt: ForwardingAttempt },
    /// Funds stuck on the custodial account; needs manual resolution.
    ForwardingFailed { attempt: ForwardingAttempt },
}

/// Fan-out of [`PaymentEvent`]s shared by every session of one forwarder.
///
/// Remembers which payment hashes have already produced a `Paid` event so
/// duplicate settlement notifications never reach subscribers twice. A hash
/// is forgotten once its session closes, since nothing can emit for it then.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PaymentEvent>,
    delivered: Arc<Mutex<HashSet<String>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            delivered: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: PaymentEvent) -> bool {
        if let PaymentEvent::Paid { invoice_hash, .. } = &event {
            let mut delivered = self
                .delivered
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !delivered.insert(invoice_hash.clone()) {
                debug!(invoice_hash = %invoice_hash, "Suppressed duplicate paid event");
                return false;
            }
        }

        // No subscribers is not an error.
        let _ = self.tx.send(event);
        true
    }

    fn forget(&self, invoice_hash: &str) {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(invoice_hash);
    }

    /// Number of hashes currently held for duplicate suppression.
    pub fn tracked_hashes(&self) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// Per-session gate in front of the bus. Once closed, nothing passes.
pub(crate) struct EventGate {
    bus: EventBus,
    invoice_hash: String,
    open: Mutex<bool>,
}

impl EventGate {
    pub(crate) fn new(bus: EventBus, invoice_hash: String) -> Self {
        Self {
            bus,
            invoice_hash,
            open: Mutex::new(true),
        }
    }

    /// Publish `event` unless the gate is closed. Returns whether it was sent.
    pub(crate) fn emit(&self, event: PaymentEvent) -> bool {
        // Hold the lock while publishing so close() cannot interleave.
        let open = self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !*open {
            debug!(invoice_hash = %event.invoice_hash(), "Dropped event for closed session");
            return false;
        }
        self.bus.publish(event)
    }

    pub(crate) fn close(&self) {
        *self.open.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
        self.bus.forget(&self.invoice_hash);
    }
}
