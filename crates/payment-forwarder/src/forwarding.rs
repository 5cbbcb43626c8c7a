//! Moves settled funds from the custodial account to the destination.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use ledger_core::{
    CreatedInvoice, CustodialLedger, InvoiceStatus, LedgerError, RemoteWalletControl,
    TransferReceipt,
};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RetryPolicy;
use crate::destination::{DestinationKind, ForwardRoute, WalletDestination};
use crate::error::{ForwarderError, Result};
use crate::memo_cache::MemoCache;

/// Lifecycle of a [`ForwardingAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    InFlight,
    Succeeded,
    /// Terminal for this run; a manual retry may start a new one.
    Failed,
}

/// One try at moving the funds.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// 1-based, counted across manual retries.
    pub number: u32,
    pub started_at: i64,
    pub error: Option<LedgerError>,
}

/// The forwarding of one settled invoice, with its full history.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardingAttempt {
    pub invoice_hash: String,
    pub destination: DestinationKind,
    pub amount_minor: u64,
    pub memo: String,
    pub attempt_count: u32,
    pub state: AttemptState,
    pub last_error: Option<LedgerError>,
    /// Ledger reference of the successful transfer or payment.
    pub reference: Option<String>,
    pub history: Vec<AttemptRecord>,
}

impl ForwardingAttempt {
    fn new(invoice_hash: &str, destination: DestinationKind, amount_minor: u64, memo: &str) -> Self {
        Self {
            invoice_hash: invoice_hash.to_string(),
            destination,
            amount_minor,
            memo: memo.to_string(),
            attempt_count: 0,
            state: AttemptState::Pending,
            last_error: None,
            reference: None,
            history: Vec::new(),
        }
    }
}

/// How many succeeded attempts are kept for duplicate rejection.
pub const DEFAULT_COMPLETED_RETENTION: usize = 1024;

#[derive(Default)]
struct AttemptTable {
    by_hash: HashMap<String, ForwardingAttempt>,
    /// Order of each hash's latest update.
    updated: HashMap<String, u64>,
    clock: u64,
    /// Succeeded hashes, oldest first.
    completed: VecDeque<String>,
}

impl AttemptTable {
    fn store(&mut self, attempt: &ForwardingAttempt, retention: usize) {
        let hash = attempt.invoice_hash.clone();
        let newly_completed = attempt.state == AttemptState::Succeeded
            && self
                .by_hash
                .get(&hash)
                .map_or(true, |previous| previous.state != AttemptState::Succeeded);
        self.clock += 1;
        self.updated.insert(hash.clone(), self.clock);
        self.by_hash.insert(hash.clone(), attempt.clone());

        if newly_completed {
            self.completed.push_back(hash);
            while self.completed.len() > retention {
                if let Some(oldest) = self.completed.pop_front() {
                    self.by_hash.remove(&oldest);
                    self.updated.remove(&oldest);
                }
            }
        }
    }

    fn last_update(&self, invoice_hash: &str) -> u64 {
        self.updated.get(invoice_hash).copied().unwrap_or_default()
    }
}

/// Executes forwarding with bounded retry and an exactly-once guard.
///
/// At most one run per invoice hash is active at a time, and a new run is
/// only allowed after the previous one failed. Independent invoices forward
/// concurrently. Failed and running attempts are kept until they succeed;
/// succeeded ones are kept for the most recent `retention` invoices.
pub struct ForwardingEngine {
    ledger: Arc<dyn CustodialLedger>,
    policy: RetryPolicy,
    memos: Option<MemoCache>,
    retention: usize,
    attempts: Mutex<AttemptTable>,
}

impl ForwardingEngine {
    pub fn new(ledger: Arc<dyn CustodialLedger>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            memos: None,
            retention: DEFAULT_COMPLETED_RETENTION,
            attempts: Mutex::new(AttemptTable::default()),
        }
    }

    /// Builder method to remember memos of invoices requested from remote wallets.
    pub fn with_memo_cache(mut self, memos: MemoCache) -> Self {
        self.memos = Some(memos);
        self
    }

    /// Builder method to bound how many succeeded attempts are remembered.
    pub fn with_completed_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, AttemptTable> {
        self.attempts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn store(&self, attempt: &ForwardingAttempt) {
        self.lock().store(attempt, self.retention);
    }

    /// Current attempt for an invoice.
    pub fn attempt(&self, invoice_hash: &str) -> Option<ForwardingAttempt> {
        self.lock().by_hash.get(invoice_hash).cloned()
    }

    /// Number of attempts currently remembered.
    pub fn tracked(&self) -> usize {
        self.lock().by_hash.len()
    }

    /// Attempts whose funds are stuck on the custodial account, most recent
    /// failure first.
    pub fn failed_attempts(&self) -> Vec<ForwardingAttempt> {
        let table = self.lock();
        let mut failed: Vec<(u64, ForwardingAttempt)> = table
            .by_hash
            .values()
            .filter(|a| a.state == AttemptState::Failed)
            .map(|a| (table.last_update(&a.invoice_hash), a.clone()))
            .collect();
        failed.sort_by(|a, b| b.0.cmp(&a.0));
        failed.into_iter().map(|(_, attempt)| attempt).collect()
    }

    /// Attempts currently running.
    pub fn in_flight(&self) -> Vec<ForwardingAttempt> {
        let mut running: Vec<ForwardingAttempt> = self
            .lock()
            .by_hash
            .values()
            .filter(|a| matches!(a.state, AttemptState::Pending | AttemptState::InFlight))
            .cloned()
            .collect();
        running.sort_by(|a, b| a.invoice_hash.cmp(&b.invoice_hash));
        running
    }

    /// Forward a settled invoice's funds to `destination`.
    ///
    /// Must only be called after settlement is confirmed. A second call for
    /// the same hash is rejected with `DuplicateForward` unless the earlier
    /// run failed, in which case this starts a new run that keeps the earlier
    /// history.
    pub async fn forward(
        &self,
        invoice_hash: &str,
        amount_minor: u64,
        memo: &str,
        destination: &WalletDestination,
    ) -> Result<ForwardingAttempt> {
        let attempt = self.claim(invoice_hash, amount_minor, memo, destination.kind())?;
        self.execute(attempt, destination).await
    }

    /// Re-run a failed attempt with its original amount and memo.
    pub async fn retry(
        &self,
        invoice_hash: &str,
        destination: &WalletDestination,
    ) -> Result<ForwardingAttempt> {
        let previous = self
            .attempt(invoice_hash)
            .ok_or_else(|| ForwarderError::UnknownInvoice(invoice_hash.to_string()))?;
        self.forward(invoice_hash, previous.amount_minor, &previous.memo, destination)
            .await
    }

    fn claim(
        &self,
        invoice_hash: &str,
        amount_minor: u64,
        memo: &str,
        destination: DestinationKind,
    ) -> Result<ForwardingAttempt> {
        let mut attempts = self.lock();
        match attempts.by_hash.get_mut(invoice_hash) {
            Some(existing) if existing.state != AttemptState::Failed => {
                warn!(
                    invoice_hash,
                    state = ?existing.state,
                    "Rejected duplicate forwarding request"
                );
                Err(ForwarderError::DuplicateForward {
                    invoice_hash: invoice_hash.to_string(),
                    state: existing.state,
                })
            }
            Some(failed) => {
                failed.state = AttemptState::Pending;
                failed.destination = destination;
                Ok(failed.clone())
            }
            None => {
                let attempt = ForwardingAttempt::new(invoice_hash, destination, amount_minor, memo);
                attempts
                    .by_hash
                    .insert(invoice_hash.to_string(), attempt.clone());
                Ok(attempt)
            }
        }
    }

    async fn execute(
        &self,
        mut attempt: ForwardingAttempt,
        destination: &WalletDestination,
    ) -> Result<ForwardingAttempt> {
        let route = destination.forward_route();
        let mut remote_invoice: Option<CreatedInvoice> = None;
        let mut tries = 0;

        loop {
            tries += 1;
            attempt.state = AttemptState::InFlight;
            attempt.attempt_count += 1;
            attempt.history.push(AttemptRecord {
                number: attempt.attempt_count,
                started_at: Utc::now().timestamp(),
                error: None,
            });
            self.store(&attempt);
            info!(
                invoice_hash = %attempt.invoice_hash,
                destination = %destination.label(),
                attempt = attempt.attempt_count,
                amount_minor = attempt.amount_minor,
                "Forwarding funds"
            );

            let result = self
                .send(
                    &route,
                    &attempt.invoice_hash,
                    attempt.amount_minor,
                    &attempt.memo,
                    &mut remote_invoice,
                )
                .await;

            let e = match result {
                Ok(receipt) => {
                    attempt.state = AttemptState::Succeeded;
                    attempt.reference = Some(receipt.reference.clone());
                    self.store(&attempt);
                    info!(
                        invoice_hash = %attempt.invoice_hash,
                        reference = %receipt.reference,
                        fee_minor = receipt.fee_minor,
                        "Forwarding succeeded"
                    );
                    return Ok(attempt);
                }
                Err(e) => e,
            };

            attempt.last_error = Some(e.clone());
            if let Some(record) = attempt.history.last_mut() {
                record.error = Some(e.clone());
            }

            if e.is_transient() && tries < self.policy.max_attempts {
                self.store(&attempt);
                let delay = self.policy.delay_after(tries);
                warn!(
                    invoice_hash = %attempt.invoice_hash,
                    attempt = tries,
                    ?delay,
                    "Transient forwarding error: {}",
                    e
                );
                sleep(delay).await;
                continue;
            }

            attempt.state = AttemptState::Failed;
            self.store(&attempt);
            error!(
                invoice_hash = %attempt.invoice_hash,
                amount_minor = attempt.amount_minor,
                attempts = attempt.attempt_count,
                "Forwarding failed, funds remain on custodial account: {}",
                e
            );
            return Err(ForwarderError::TerminalForwarding {
                attempt: Box::new(attempt),
                source: e,
            });
        }
    }

    async fn send(
        &self,
        route: &ForwardRoute,
        invoice_hash: &str,
        amount_minor: u64,
        memo: &str,
        remote_invoice: &mut Option<CreatedInvoice>,
    ) -> std::result::Result<TransferReceipt, LedgerError> {
        match route {
            ForwardRoute::Internal(target) => {
                // Keyed by the settled invoice, so a resend after a lost
                // response never moves the funds twice.
                self.ledger
                    .transfer_internal(target, amount_minor, memo, invoice_hash)
                    .await
            }
            ForwardRoute::RemoteInvoice(control) => {
                // One remote invoice per run; retries pay the same one.
                let invoice = match remote_invoice {
                    Some(invoice) => {
                        if let Some(receipt) = confirm_remote_payment(control.as_ref(), invoice).await
                        {
                            return Ok(receipt);
                        }
                        invoice.clone()
                    }
                    None => {
                        let created = control.create_invoice(amount_minor, memo).await?;
                        if let Some(memos) = &self.memos {
                            memos.remember(&created.payment_hash, memo).await;
                        }
                        *remote_invoice = Some(created.clone());
                        created
                    }
                };
                self.ledger.pay_invoice(&invoice.payment_request).await
            }
        }
    }
}

/// Ask the destination wallet whether an earlier payment of `invoice` landed
/// even though its response was lost.
async fn confirm_remote_payment(
    control: &dyn RemoteWalletControl,
    invoice: &CreatedInvoice,
) -> Option<TransferReceipt> {
    match control.lookup_invoice(&invoice.payment_hash).await {
        Ok(InvoiceStatus::Settled { .. }) => {
            info!(
                payment_hash = %invoice.payment_hash,
                "Destination already received the payment"
            );
            Some(TransferReceipt {
                reference: invoice.payment_hash.clone(),
                fee_minor: 0,
            })
        }
        Ok(_) => None,
        Err(e) => {
            debug!(payment_hash = %invoice.payment_hash, "Remote lookup unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{ApiKeyWallet, EcashMailboxWallet};
    use ledger_core::TransferTarget;
    use mock_ledger::MockLedger;
    use secrecy::SecretString;
    use std::time::Duration;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }

    fn api_key_destination() -> WalletDestination {
        WalletDestination::ApiKey(ApiKeyWallet::new(SecretString::from("k"), "wallet-1"))
    }

    #[tokio::test]
    async fn test_forward_internal_transfer() {
        let ledger = Arc::new(MockLedger::new());
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());

        let attempt = engine
            .forward("h1", 1000, "coffee", &api_key_destination())
            .await
            .unwrap();

        assert_eq!(attempt.state, AttemptState::Succeeded);
        assert_eq!(attempt.attempt_count, 1);
        let transfers = ledger.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].target, TransferTarget::Wallet("wallet-1".into()));
        assert_eq!(transfers[0].amount_minor, 1000);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([LedgerError::Timeout, LedgerError::RateLimited]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());

        let attempt = engine
            .forward("h2", 10, "", &api_key_destination())
            .await
            .unwrap();

        assert_eq!(attempt.attempt_count, 3);
        assert_eq!(attempt.history[0].error, Some(LedgerError::Timeout));
        assert_eq!(attempt.history[2].error, None);
        assert_eq!(ledger.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_bound_exhausted() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([
            LedgerError::Timeout,
            LedgerError::Timeout,
            LedgerError::Timeout,
        ]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());

        let err = engine
            .forward("h3", 10, "", &api_key_destination())
            .await
            .unwrap_err();
        let attempt = err.attempt().unwrap();
        assert_eq!(attempt.attempt_count, 3);
        assert_eq!(attempt.state, AttemptState::Failed);
        assert_eq!(engine.failed_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_is_terminal_immediately() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([LedgerError::Unauthorized("revoked".into())]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());

        let err = engine
            .forward("h4", 10, "", &api_key_destination())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForwarderError::TerminalForwarding { source: LedgerError::Unauthorized(_), .. }
        ));
        assert_eq!(err.attempt().unwrap().attempt_count, 1);
    }

    #[tokio::test]
    async fn test_duplicate_rejected_until_failed() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([LedgerError::Unreachable("gone".into())]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());
        let destination = WalletDestination::EcashMailbox(EcashMailboxWallet {
            address: "box@mint".into(),
        });

        assert!(engine.forward("h5", 10, "", &destination).await.is_err());

        let attempt = engine.retry("h5", &destination).await.unwrap();
        assert_eq!(attempt.state, AttemptState::Succeeded);
        assert_eq!(attempt.attempt_count, 2);
        assert_eq!(attempt.history.len(), 2);

        let err = engine.forward("h5", 10, "", &destination).await.unwrap_err();
        assert!(matches!(
            err,
            ForwarderError::DuplicateForward { state: AttemptState::Succeeded, .. }
        ));
        assert_eq!(ledger.transfers().len(), 1);
    }

    #[tokio::test]
    async fn test_lost_transfer_response_does_not_move_funds_twice() {
        let ledger = Arc::new(MockLedger::new());
        // The ledger commits the first transfer, then the response times out.
        ledger.script_lost_transfer_acks([LedgerError::Timeout]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());

        let attempt = engine
            .forward("hash-x", 1000, "order", &api_key_destination())
            .await
            .unwrap();

        assert_eq!(attempt.state, AttemptState::Succeeded);
        assert_eq!(attempt.attempt_count, 2);
        assert_eq!(attempt.history[0].error, Some(LedgerError::Timeout));
        let transfers = ledger.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount_minor, 1000);
        assert_eq!(transfers[0].idempotency_key, "hash-x");
    }

    #[tokio::test]
    async fn test_retry_of_unknown_invoice() {
        let engine = ForwardingEngine::new(Arc::new(MockLedger::new()), fast_policy());

        let err = engine.retry("nope", &api_key_destination()).await.unwrap_err();
        assert!(matches!(err, ForwarderError::UnknownInvoice(ref hash) if hash == "nope"));
    }

    #[tokio::test]
    async fn test_succeeded_attempts_are_bounded_but_failures_kept() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([LedgerError::Unauthorized("revoked".into())]);
        let engine =
            ForwardingEngine::new(ledger.clone(), fast_policy()).with_completed_retention(2);
        let destination = api_key_destination();

        assert!(engine.forward("stuck", 10, "", &destination).await.is_err());
        for hash in ["h1", "h2", "h3"] {
            engine.forward(hash, 10, "", &destination).await.unwrap();
        }

        assert_eq!(engine.tracked(), 3);
        assert!(engine.attempt("h1").is_none());
        assert!(engine.attempt("h3").is_some());
        assert_eq!(engine.failed_attempts()[0].invoice_hash, "stuck");
    }

    #[tokio::test]
    async fn test_failed_attempts_most_recent_first() {
        let ledger = Arc::new(MockLedger::new());
        ledger.script_transfer_errors([
            LedgerError::Unreachable("a".into()),
            LedgerError::Unreachable("b".into()),
            LedgerError::Unreachable("a again".into()),
        ]);
        let engine = ForwardingEngine::new(ledger.clone(), fast_policy());
        let destination = api_key_destination();

        assert!(engine.forward("a", 10, "", &destination).await.is_err());
        assert!(engine.forward("b", 10, "", &destination).await.is_err());
        let order: Vec<String> = engine
            .failed_attempts()
            .into_iter()
            .map(|a| a.invoice_hash)
            .collect();
        assert_eq!(order, vec!["b", "a"]);

        assert!(engine.retry("a", &destination).await.is_err());
        let order: Vec<String> = engine
            .failed_attempts()
            .into_iter()
            .map(|a| a.invoice_hash)
            .collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
