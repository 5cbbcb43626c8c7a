//! The entry point callers use.

use std::sync::Arc;
use std::time::Duration;

use ledger_core::{CreatedInvoice, CustodialLedger, KeyValueStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{error, info, warn};

use crate::aggregator::{TransactionAggregator, TransactionPage};
use crate::config::ForwarderConfig;
use crate::destination::{DestinationInvoicer, DestinationResolver, WalletDestination};
use crate::detection::{DetectionChannel, DetectionHandle, DetectionOutcome, DetectionState};
use crate::error::{ForwarderError, Result};
use crate::events::{EventBus, PaymentEvent, PaymentStatus};
use crate::forwarding::{AttemptState, ForwardingAttempt, ForwardingEngine};
use crate::memo_cache::MemoCache;
use crate::session::{Invoice, InvoiceSession, InvoiceState};

struct ActiveSession {
    session: Arc<InvoiceSession>,
    destination: WalletDestination,
    detection: DetectionHandle,
}

/// Coordinates invoices on the custodial ledger and forwards their funds.
///
/// One invoice may be outstanding at a time. Opening spawns a pipeline that
/// waits for settlement, emits `Paid`, forwards, and emits the outcome.
/// History queries run independently of that pipeline.
pub struct PaymentForwarder {
    ledger: Arc<dyn CustodialLedger>,
    resolver: DestinationResolver,
    config: ForwarderConfig,
    engine: Arc<ForwardingEngine>,
    aggregator: TransactionAggregator,
    memos: Option<MemoCache>,
    events: EventBus,
    active: Mutex<Option<ActiveSession>>,
}

impl PaymentForwarder {
    pub fn new(
        ledger: Arc<dyn CustodialLedger>,
        resolver: DestinationResolver,
        config: ForwarderConfig,
    ) -> Self {
        Self {
            engine: Arc::new(ForwardingEngine::new(
                Arc::clone(&ledger),
                config.forward_retry.clone(),
            )),
            aggregator: TransactionAggregator::new(Arc::clone(&ledger), config.history_timeout),
            events: EventBus::new(config.event_capacity),
            memos: None,
            active: Mutex::new(None),
            ledger,
            resolver,
            config,
        }
    }

    /// Builder method to keep invoice memos in a persistent store.
    pub fn with_memo_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        let memos = MemoCache::new(store);
        self.engine = Arc::new(
            ForwardingEngine::new(Arc::clone(&self.ledger), self.config.forward_retry.clone())
                .with_memo_cache(memos.clone()),
        );
        self.aggregator = TransactionAggregator::new(Arc::clone(&self.ledger), self.config.history_timeout)
            .with_memo_cache(memos.clone());
        self.memos = Some(memos);
        self
    }

    /// Resolve the merchant's active destination.
    pub async fn resolve_active(&self) -> Result<WalletDestination> {
        self.resolver.resolve_active().await
    }

    /// Subscribe to payment events.
    pub fn subscribe(&self) -> broadcast::Receiver<PaymentEvent> {
        self.events.subscribe()
    }

    /// The forwarding engine, for callers that drive forwarding themselves.
    pub fn engine(&self) -> &Arc<ForwardingEngine> {
        &self.engine
    }

    /// Open an invoice for `amount_minor` and start watching for its settlement.
    ///
    /// Returns as soon as the invoice exists; detection connects in the
    /// background. Fails with `SessionAlreadyOpen` while a previous invoice
    /// is still unpaid or forwarding.
    pub async fn open_invoice(&self, amount_minor: i64, memo: &str) -> Result<Invoice> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            let state = current.session.state();
            if !current.session.is_closed() && !state.is_finished() {
                return Err(ForwarderError::SessionAlreadyOpen(
                    current.session.expected_hash(),
                ));
            }
            current.session.close();
        }

        let destination = self.resolver.resolve_active().await?;
        let session = InvoiceSession::open(
            self.ledger.as_ref(),
            amount_minor,
            memo,
            destination.kind(),
            self.config.invoice_expiry,
            &self.events,
        )
        .await?;
        let invoice = session.invoice();

        if let Some(memos) = &self.memos {
            memos.remember(&invoice.payment_hash, memo).await;
        }

        let channel = DetectionChannel::new(
            Arc::clone(&self.ledger),
            invoice.payment_hash.clone(),
            session.cancelled(),
            invoice.expires_in(),
        )
        .with_reconnect(self.config.reconnect.clone())
        .with_poll_interval(self.config.poll_interval);
        let detection = channel.handle();

        let session = Arc::new(session);
        tokio::spawn(run_pipeline(
            Arc::clone(&session),
            channel,
            detection.clone(),
            Arc::clone(&self.engine),
            destination.clone(),
        ));

        *active = Some(ActiveSession {
            session,
            destination,
            detection,
        });
        Ok(invoice)
    }

    /// Close the current session. Safe to call with nothing open.
    ///
    /// Detection stops and no further events are emitted for the session. A
    /// payment already matched keeps forwarding in the background.
    pub async fn close(&self) {
        if let Some(current) = self.active.lock().await.take() {
            current.session.close();
        }
    }

    /// Every invoice whose funds are stuck on the custodial account, most
    /// recent failure first.
    ///
    /// Unlike [`status`](Self::status), this reports earlier failures even
    /// while a newer invoice is awaiting payment.
    pub fn stuck_funds(&self) -> Vec<ForwardingAttempt> {
        self.engine.failed_attempts()
    }

    /// What the caller should currently show.
    ///
    /// The current session wins; with none active, a running forward and
    /// then the most recent stuck funds are reported.
    pub async fn status(&self) -> PaymentStatus {
        let active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            let hash = current.session.expected_hash();
            match current.session.state() {
                InvoiceState::Open if !current.session.is_closed() => {
                    return PaymentStatus::AwaitingPayment { invoice_hash: hash }
                }
                InvoiceState::Paid | InvoiceState::Forwarding => {
                    return PaymentStatus::Forwarding { invoice_hash: hash }
                }
                InvoiceState::Forwarded | InvoiceState::ForwardingFailed => {
                    if let Some(attempt) = self.engine.attempt(&hash) {
                        return status_of(attempt);
                    }
                }
                _ => {}
            }
        }

        // Forwarding and stuck funds outlive the session that produced them.
        if let Some(attempt) = self.engine.in_flight().into_iter().next() {
            return status_of(attempt);
        }
        if let Some(attempt) = self.engine.failed_attempts().into_iter().next() {
            return PaymentStatus::ForwardingFailed { attempt };
        }
        PaymentStatus::Idle
    }

    /// Re-run forwarding for an invoice whose forwarding failed.
    ///
    /// Outcome events are emitted only if the invoice's session is still open.
    pub async fn retry_forwarding(&self, invoice_hash: &str) -> Result<ForwardingAttempt> {
        match self.engine.attempt(invoice_hash) {
            Some(attempt) if attempt.state == AttemptState::Failed => {}
            Some(attempt) => {
                return Err(ForwarderError::DuplicateForward {
                    invoice_hash: invoice_hash.to_string(),
                    state: attempt.state,
                })
            }
            None => return Err(ForwarderError::UnknownInvoice(invoice_hash.to_string())),
        }

        let destination = self.resolver.resolve_active().await?;
        let session = {
            let active = self.active.lock().await;
            active
                .as_ref()
                .filter(|current| current.session.expected_hash() == invoice_hash)
                .map(|current| Arc::clone(&current.session))
        };

        info!(invoice_hash, destination = %destination.label(), "Manual forwarding retry");
        if let Some(session) = &session {
            session.set_state(InvoiceState::Forwarding);
        }

        let result = self.engine.retry(invoice_hash, &destination).await;
        if let Some(session) = &session {
            publish_outcome(session, &result);
        }
        result
    }

    /// Reconnect the detection feed now, resetting the attempt counter.
    pub async fn reconnect(&self) -> Result<()> {
        let active = self.active.lock().await;
        let current = active.as_ref().ok_or(ForwarderError::NoOpenSession)?;
        current.detection.reconnect();
        Ok(())
    }

    pub async fn detection_state(&self) -> DetectionState {
        match self.active.lock().await.as_ref() {
            Some(current) => current.detection.state(),
            None => DetectionState::Idle,
        }
    }

    /// Consecutive failed reconnects of the current detection feed.
    pub async fn reconnect_attempts(&self) -> u32 {
        match self.active.lock().await.as_ref() {
            Some(current) => current.detection.reconnect_attempts(),
            None => 0,
        }
    }

    /// Backoff delays the current detection feed has waited, in order.
    pub async fn backoff_history(&self) -> Vec<Duration> {
        match self.active.lock().await.as_ref() {
            Some(current) => current.detection.backoff_history(),
            None => Vec::new(),
        }
    }

    /// Handle to the current detection channel.
    pub async fn detection(&self) -> Option<DetectionHandle> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.detection.clone())
    }

    /// Destination the current session forwards to.
    pub async fn session_destination(&self) -> Option<WalletDestination> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|current| current.destination.clone())
    }

    /// Ask the destination itself for an invoice, bypassing the custodial ledger.
    ///
    /// Rejected with `UnsupportedOperation` for destinations that cannot
    /// issue invoices.
    pub async fn request_destination_invoice(
        &self,
        amount_minor: i64,
        memo: &str,
    ) -> Result<CreatedInvoice> {
        let destination = self.resolver.resolve_active().await?;
        let invoicer = destination.invoicer()?;
        if amount_minor <= 0 {
            return Err(ForwarderError::InvalidAmount(amount_minor));
        }
        let amount = amount_minor as u64;

        let created = match invoicer {
            DestinationInvoicer::Ledger(credential) => {
                self.ledger
                    .create_wallet_invoice(credential, amount, memo)
                    .await
            }
            DestinationInvoicer::Remote(control) => control.create_invoice(amount, memo).await,
        }
        .map_err(ForwarderError::InvoiceCreationFailed)?;

        if let Some(memos) = &self.memos {
            memos.remember(&created.payment_hash, memo).await;
        }
        info!(
            payment_hash = %created.payment_hash,
            destination = %destination.label(),
            "Issued invoice on destination"
        );
        Ok(created)
    }

    /// One page of the active destination's history.
    pub async fn list_transactions(&self, cursor: Option<&str>) -> Result<TransactionPage> {
        let destination = self.resolver.resolve_active().await?;
        self.aggregator.list(&destination, cursor).await
    }
}

fn status_of(attempt: ForwardingAttempt) -> PaymentStatus {
    match attempt.state {
        AttemptState::Succeeded => PaymentStatus::Forwarded { attempt },
        AttemptState::Failed => PaymentStatus::ForwardingFailed { attempt },
        AttemptState::Pending | AttemptState::InFlight => PaymentStatus::Forwarding {
            invoice_hash: attempt.invoice_hash,
        },
    }
}

fn publish_outcome(session: &InvoiceSession, result: &Result<ForwardingAttempt>) {
    match result {
        Ok(attempt) => {
            session.set_state(InvoiceState::Forwarded);
            session.emit(PaymentEvent::Forwarded {
                attempt: attempt.clone(),
            });
        }
        Err(ForwarderError::TerminalForwarding { attempt, source }) => {
            session.set_state(InvoiceState::ForwardingFailed);
            session.emit(PaymentEvent::ForwardingFailed {
                attempt: attempt.as_ref().clone(),
                error: source.to_string(),
            });
        }
        Err(e) => {
            // Another run owns this invoice; leave its state alone.
            warn!(invoice_hash = %session.expected_hash(), "Forwarding not started: {}", e);
        }
    }
}

async fn run_pipeline(
    session: Arc<InvoiceSession>,
    channel: DetectionChannel,
    detection: DetectionHandle,
    engine: Arc<ForwardingEngine>,
    destination: WalletDestination,
) {
    let settlement = match channel.run().await {
        DetectionOutcome::Paid(settlement) => settlement,
        DetectionOutcome::Expired => {
            session.set_state(InvoiceState::Expired);
            return;
        }
        DetectionOutcome::Cancelled => return,
    };

    let invoice = session.invoice();
    let memo = settlement.memo.clone().unwrap_or(invoice.memo);

    session.set_state(InvoiceState::Paid);
    session.emit(PaymentEvent::Paid {
        invoice_hash: settlement.payment_hash.clone(),
        amount_minor: settlement.amount_minor,
        memo: memo.clone(),
    });
    detection.mark_closed();

    session.set_state(InvoiceState::Forwarding);
    let result = engine
        .forward(
            &settlement.payment_hash,
            settlement.amount_minor,
            &memo,
            &destination,
        )
        .await;

    if let Err(e) = &result {
        if e.attempt().is_none() {
            error!(invoice_hash = %settlement.payment_hash, "Forwarding could not start: {}", e);
        }
    }
    publish_outcome(&session, &result);
}
