//! Mock custodial ledger with a shared, multi-tenant settlement feed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;
use ledger_core::{
    async_trait, CreatedInvoice, CustodialLedger, InvoiceStatus, LedgerError, LedgerTransaction,
    Page, Settlement, SettlementStream, TransferReceipt, TransferTarget, WalletCredential,
};
use tokio::sync::broadcast;
use tokio::time::sleep;

use crate::remote::MockRemoteWallet;

/// Default number of transactions returned per page.
const DEFAULT_PAGE_SIZE: usize = 50;

/// A transfer the ledger executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedTransfer {
    pub target: TransferTarget,
    pub amount_minor: u64,
    pub memo: String,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
struct MockInvoice {
    amount_minor: u64,
    memo: String,
    status: InvoiceStatus,
}

#[derive(Default)]
struct LedgerState {
    next_invoice: u64,
    invoices: HashMap<String, MockInvoice>,
    failing_subscriptions: u32,
    subscriptions_always_fail: bool,
    invoice_errors: VecDeque<LedgerError>,
    transfer_errors: VecDeque<LedgerError>,
    payment_errors: VecDeque<LedgerError>,
    lost_transfer_acks: VecDeque<LedgerError>,
    lost_payment_acks: VecDeque<LedgerError>,
    transfers: Vec<RecordedTransfer>,
    committed_transfers: HashMap<String, TransferReceipt>,
    payments: Vec<String>,
    payees: Vec<Arc<MockRemoteWallet>>,
    wallets: HashMap<String, String>,
    wallet_transactions: HashMap<String, Vec<LedgerTransaction>>,
}

/// An in-memory custodial ledger.
///
/// Every subscriber sees every settlement, mirroring a real shared account
/// whose feed is not partitioned per merchant session.
pub struct MockLedger {
    state: Mutex<LedgerState>,
    feed: broadcast::Sender<Result<Settlement, LedgerError>>,
    subscribe_calls: AtomicU32,
    push: bool,
    transfer_delay: Duration,
    subscribe_delay: Duration,
    page_size: usize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    /// Create a ledger with a push feed and instant transfers.
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(LedgerState::default()),
            feed,
            subscribe_calls: AtomicU32::new(0),
            push: true,
            transfer_delay: Duration::ZERO,
            subscribe_delay: Duration::ZERO,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Make the ledger advertise no push feed, forcing callers to poll.
    pub fn without_push(mut self) -> Self {
        self.push = false;
        self
    }

    /// Delay every transfer and payment by `delay`.
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = delay;
        self
    }

    /// Delay every subscription attempt by `delay`.
    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Limit how many transactions a listing returns per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a settlement on the shared feed.
    ///
    /// Marks the invoice settled if this ledger issued it. Returns the number
    /// of subscribers that received it.
    pub fn settle(&self, payment_hash: &str, amount_minor: u64, memo: Option<&str>) -> usize {
        if let Some(invoice) = self.state().invoices.get_mut(payment_hash) {
            invoice.status = InvoiceStatus::Settled {
                settled_at: 1_700_000_000,
                amount_minor,
            };
        }

        let settlement = Settlement {
            payment_hash: payment_hash.to_string(),
            amount_minor,
            memo: memo.map(str::to_string),
        };
        self.feed.send(Ok(settlement)).unwrap_or(0)
    }

    /// Settle an invoice this ledger issued, using its own amount and memo.
    ///
    /// Returns false if the hash is unknown.
    pub fn settle_invoice(&self, payment_hash: &str) -> bool {
        let invoice = self.state().invoices.get(payment_hash).cloned();
        match invoice {
            Some(invoice) => {
                self.settle(payment_hash, invoice.amount_minor, Some(&invoice.memo));
                true
            }
            None => false,
        }
    }

    /// Mark an issued invoice as expired.
    pub fn expire_invoice(&self, payment_hash: &str) {
        if let Some(invoice) = self.state().invoices.get_mut(payment_hash) {
            invoice.status = InvoiceStatus::Expired;
        }
    }

    /// Push a transport error to every open feed connection.
    pub fn break_feed(&self, error: LedgerError) -> usize {
        self.feed.send(Err(error)).unwrap_or(0)
    }

    /// Fail the next `count` subscription attempts.
    pub fn fail_next_subscriptions(&self, count: u32) {
        self.state().failing_subscriptions = count;
    }

    /// Fail every subscription attempt until switched off.
    pub fn set_subscriptions_failing(&self, failing: bool) {
        self.state().subscriptions_always_fail = failing;
    }

    /// Fail the next invoice creation with `error`.
    pub fn fail_next_invoice(&self, error: LedgerError) {
        self.state().invoice_errors.push_back(error);
    }

    /// Fail upcoming internal transfers with these errors, in order.
    pub fn script_transfer_errors(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.state().transfer_errors.extend(errors);
    }

    /// Fail upcoming invoice payments with these errors, in order.
    pub fn script_payment_errors(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.state().payment_errors.extend(errors);
    }

    /// Commit upcoming internal transfers but answer with these errors, as
    /// when a response is lost after the ledger already moved the funds.
    pub fn script_lost_transfer_acks(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.state().lost_transfer_acks.extend(errors);
    }

    /// Commit upcoming invoice payments but answer with these errors.
    pub fn script_lost_payment_acks(&self, errors: impl IntoIterator<Item = LedgerError>) {
        self.state().lost_payment_acks.extend(errors);
    }

    /// Settle invoices issued by `wallet` when this ledger pays them.
    pub fn route_payments_to(&self, wallet: Arc<MockRemoteWallet>) {
        self.state().payees.push(wallet);
    }

    /// Register a merchant wallet and the API key that opens it.
    pub fn register_wallet(&self, wallet_id: &str, api_key: &str) {
        self.state()
            .wallets
            .insert(wallet_id.to_string(), api_key.to_string());
    }

    /// Append transactions to a merchant wallet's history.
    pub fn add_wallet_transactions(
        &self,
        wallet_id: &str,
        transactions: impl IntoIterator<Item = LedgerTransaction>,
    ) {
        self.state()
            .wallet_transactions
            .entry(wallet_id.to_string())
            .or_default()
            .extend(transactions);
    }

    /// Transfers executed so far.
    pub fn transfers(&self) -> Vec<RecordedTransfer> {
        self.state().transfers.clone()
    }

    /// BOLT11 invoices paid so far.
    pub fn payments(&self) -> Vec<String> {
        self.state().payments.clone()
    }

    /// Number of invoices issued on the shared account.
    pub fn invoices_created(&self) -> usize {
        self.state().invoices.len()
    }

    /// Number of subscription attempts, successful or not.
    pub fn subscribe_calls(&self) -> u32 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of currently open feed connections.
    pub fn active_subscribers(&self) -> usize {
        self.feed.receiver_count()
    }

    fn issue_invoice(&self, amount_minor: u64, memo: &str) -> Result<CreatedInvoice, LedgerError> {
        let mut state = self.state();
        if let Some(error) = state.invoice_errors.pop_front() {
            return Err(error);
        }

        state.next_invoice += 1;
        let n = state.next_invoice;
        let payment_hash = format!("{:064x}", n);
        let invoice = CreatedInvoice {
            payment_request: format!("lnbcrt{}n1mock{}", amount_minor, n),
            payment_hash: payment_hash.clone(),
            expires_at: None,
        };
        state.invoices.insert(
            payment_hash,
            MockInvoice {
                amount_minor,
                memo: memo.to_string(),
                status: InvoiceStatus::Pending,
            },
        );
        Ok(invoice)
    }
}

#[async_trait]
impl CustodialLedger for MockLedger {
    async fn create_invoice(
        &self,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        self.issue_invoice(amount_minor, memo)
    }

    async fn subscribe_settlements(&self) -> Result<SettlementStream, LedgerError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.subscribe_delay.is_zero() {
            sleep(self.subscribe_delay).await;
        }

        if !self.push {
            return Err(LedgerError::Unsupported("settlement feed".to_string()));
        }

        {
            let mut state = self.state();
            if state.subscriptions_always_fail {
                return Err(LedgerError::Transport("connection refused".to_string()));
            }
            if state.failing_subscriptions > 0 {
                state.failing_subscriptions -= 1;
                return Err(LedgerError::Transport("connection refused".to_string()));
            }
        }

        let rx = self.feed.subscribe();
        let feed = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(item) => return Some((item, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(feed))
    }

    async fn transfer_internal(
        &self,
        to: &TransferTarget,
        amount_minor: u64,
        memo: &str,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        if !self.transfer_delay.is_zero() {
            sleep(self.transfer_delay).await;
        }

        let mut state = self.state();
        if let Some(receipt) = state.committed_transfers.get(idempotency_key) {
            return Ok(receipt.clone());
        }
        if let Some(error) = state.transfer_errors.pop_front() {
            return Err(error);
        }
        state.transfers.push(RecordedTransfer {
            target: to.clone(),
            amount_minor,
            memo: memo.to_string(),
            idempotency_key: idempotency_key.to_string(),
        });
        let receipt = TransferReceipt {
            reference: format!("transfer-{}", state.transfers.len()),
            fee_minor: 0,
        };
        state
            .committed_transfers
            .insert(idempotency_key.to_string(), receipt.clone());

        match state.lost_transfer_acks.pop_front() {
            Some(error) => Err(error),
            None => Ok(receipt),
        }
    }

    async fn pay_invoice(&self, bolt11: &str) -> Result<TransferReceipt, LedgerError> {
        if !self.transfer_delay.is_zero() {
            sleep(self.transfer_delay).await;
        }

        let mut state = self.state();
        if state.payments.iter().any(|paid| paid == bolt11) {
            return Err(LedgerError::Rejected("invoice already paid".to_string()));
        }
        if let Some(error) = state.payment_errors.pop_front() {
            return Err(error);
        }
        state.payments.push(bolt11.to_string());
        for payee in &state.payees {
            payee.mark_paid(bolt11);
        }
        let receipt = TransferReceipt {
            reference: format!("payment-{}", state.payments.len()),
            fee_minor: 1,
        };

        match state.lost_payment_acks.pop_front() {
            Some(error) => Err(error),
            None => Ok(receipt),
        }
    }

    fn name(&self) -> &str {
        "mock-ledger"
    }

    fn supports_push(&self) -> bool {
        self.push
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus, LedgerError> {
        self.state()
            .invoices
            .get(payment_hash)
            .map(|invoice| invoice.status)
            .ok_or_else(|| LedgerError::InvoiceNotFound(payment_hash.to_string()))
    }

    async fn create_wallet_invoice(
        &self,
        credential: WalletCredential<'_>,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        self.authorize(credential)?;
        self.issue_invoice(amount_minor, memo)
    }

    async fn list_wallet_transactions(
        &self,
        credential: WalletCredential<'_>,
        cursor: Option<&str>,
    ) -> Result<Page<LedgerTransaction>, LedgerError> {
        self.authorize(credential)?;

        let start = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| LedgerError::Rejected(format!("bad cursor: {}", raw)))?,
            None => 0,
        };

        let state = self.state();
        let all = state
            .wallet_transactions
            .get(credential.wallet_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let end = (start + self.page_size).min(all.len());
        let items = all.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_cursor = (end < all.len()).then(|| end.to_string());

        Ok(Page { items, next_cursor })
    }
}

impl MockLedger {
    fn authorize(&self, credential: WalletCredential<'_>) -> Result<(), LedgerError> {
        match self.state().wallets.get(credential.wallet_id) {
            Some(key) if key == credential.api_key => Ok(()),
            Some(_) => Err(LedgerError::Unauthorized(credential.wallet_id.to_string())),
            None => Err(LedgerError::Unreachable(credential.wallet_id.to_string())),
        }
    }
}
