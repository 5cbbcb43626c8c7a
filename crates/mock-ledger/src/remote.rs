//! Mock remote-control wallets.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use ledger_core::{
    async_trait, CreatedInvoice, InvoiceStatus, LedgerError, Page, RemoteCapabilities,
    RemoteMethod, RemoteTransaction, RemoteWalletConnector, RemoteWalletControl,
};

#[derive(Default)]
struct RemoteState {
    issued: Vec<CreatedInvoice>,
    amounts: HashMap<String, u64>,
    statuses: HashMap<String, InvoiceStatus>,
    transactions: Vec<RemoteTransaction>,
    invoice_errors: VecDeque<LedgerError>,
}

/// A remote-control wallet that only honours the methods it advertises.
pub struct MockRemoteWallet {
    capabilities: RemoteCapabilities,
    state: Mutex<RemoteState>,
    page_size: usize,
}

impl MockRemoteWallet {
    /// Create a wallet advertising exactly `methods`.
    pub fn with_methods(methods: impl IntoIterator<Item = RemoteMethod>) -> Self {
        Self {
            capabilities: methods.into_iter().collect(),
            state: Mutex::new(RemoteState::default()),
            page_size: 50,
        }
    }

    /// Create a wallet advertising every method.
    pub fn full() -> Self {
        Self::with_methods([
            RemoteMethod::PayInvoice,
            RemoteMethod::MakeInvoice,
            RemoteMethod::LookupInvoice,
            RemoteMethod::ListTransactions,
            RemoteMethod::GetBalance,
            RemoteMethod::Notifications,
        ])
    }

    /// Limit how many transactions a listing returns per page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn require(&self, method: RemoteMethod) -> Result<(), LedgerError> {
        if self.capabilities.contains(method) {
            Ok(())
        } else {
            Err(LedgerError::Unsupported(method.to_string()))
        }
    }

    /// Append transactions to the wallet's history.
    pub fn add_transactions(&self, transactions: impl IntoIterator<Item = RemoteTransaction>) {
        self.state().transactions.extend(transactions);
    }

    /// Override the status reported for an invoice.
    pub fn set_invoice_status(&self, payment_hash: &str, status: InvoiceStatus) {
        self.state()
            .statuses
            .insert(payment_hash.to_string(), status);
    }

    /// Fail the next invoice request with `error`.
    pub fn fail_next_invoice(&self, error: LedgerError) {
        self.state().invoice_errors.push_back(error);
    }

    /// Settle the issued invoice whose payment request is `bolt11`.
    ///
    /// Returns false if this wallet did not issue it.
    pub fn mark_paid(&self, bolt11: &str) -> bool {
        let mut state = self.state();
        let Some(payment_hash) = state
            .issued
            .iter()
            .find(|invoice| invoice.payment_request == bolt11)
            .map(|invoice| invoice.payment_hash.clone())
        else {
            return false;
        };
        let amount_minor = state.amounts.get(&payment_hash).copied().unwrap_or_default();
        state.statuses.insert(
            payment_hash,
            InvoiceStatus::Settled {
                settled_at: 1_700_000_000,
                amount_minor,
            },
        );
        true
    }

    /// Invoices the wallet has issued.
    pub fn issued_invoices(&self) -> Vec<CreatedInvoice> {
        self.state().issued.clone()
    }
}

#[async_trait]
impl RemoteWalletControl for MockRemoteWallet {
    async fn get_capabilities(&self) -> Result<RemoteCapabilities, LedgerError> {
        Ok(self.capabilities.clone())
    }

    async fn create_invoice(
        &self,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        self.require(RemoteMethod::MakeInvoice)?;

        let mut state = self.state();
        if let Some(error) = state.invoice_errors.pop_front() {
            return Err(error);
        }

        let n = state.issued.len() + 1;
        let invoice = CreatedInvoice {
            payment_request: format!("lnbc{}n1remote{}{}", amount_minor, n, memo.len()),
            payment_hash: format!("remote{:058x}", n),
            expires_at: None,
        };
        state
            .statuses
            .insert(invoice.payment_hash.clone(), InvoiceStatus::Pending);
        state
            .amounts
            .insert(invoice.payment_hash.clone(), amount_minor);
        state.issued.push(invoice.clone());
        Ok(invoice)
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus, LedgerError> {
        self.require(RemoteMethod::LookupInvoice)?;
        self.state()
            .statuses
            .get(payment_hash)
            .copied()
            .ok_or_else(|| LedgerError::InvoiceNotFound(payment_hash.to_string()))
    }

    async fn list_transactions(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<RemoteTransaction>, LedgerError> {
        self.require(RemoteMethod::ListTransactions)?;

        let start = match cursor {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| LedgerError::Rejected(format!("bad cursor: {}", raw)))?,
            None => 0,
        };

        let state = self.state();
        let end = (start + self.page_size).min(state.transactions.len());
        let items = state
            .transactions
            .get(start..end)
            .map(<[_]>::to_vec)
            .unwrap_or_default();
        let next_cursor = (end < state.transactions.len()).then(|| end.to_string());

        Ok(Page { items, next_cursor })
    }
}

/// Connects connection URIs to pre-registered mock wallets.
#[derive(Default)]
pub struct MockConnector {
    wallets: Mutex<HashMap<String, Arc<MockRemoteWallet>>>,
    connects: AtomicU32,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the wallet reachable at `connection_uri`.
    pub fn register(&self, connection_uri: &str, wallet: Arc<MockRemoteWallet>) {
        self.wallets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connection_uri.to_string(), wallet);
    }

    /// Number of connection attempts made.
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteWalletConnector for MockConnector {
    async fn connect(
        &self,
        connection_uri: &str,
    ) -> Result<Arc<dyn RemoteWalletControl>, LedgerError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let wallet = self
            .wallets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(connection_uri)
            .cloned();

        match wallet {
            Some(wallet) => Ok(wallet),
            None => Err(LedgerError::Unreachable("remote wallet".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unadvertised_methods_are_rejected() {
        let wallet = MockRemoteWallet::with_methods([RemoteMethod::PayInvoice]);

        assert!(matches!(
            wallet.create_invoice(10, "x").await,
            Err(LedgerError::Unsupported(_))
        ));
        assert!(matches!(
            wallet.list_transactions(None).await,
            Err(LedgerError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_connector_returns_registered_wallet() {
        let connector = MockConnector::new();
        connector.register("nostr+walletconnect://abc", Arc::new(MockRemoteWallet::full()));

        let wallet = connector.connect("nostr+walletconnect://abc").await.unwrap();
        let caps = wallet.get_capabilities().await.unwrap();
        assert!(caps.contains(RemoteMethod::MakeInvoice));

        assert!(connector.connect("nostr+walletconnect://other").await.is_err());
        assert_eq!(connector.connects(), 2);
    }
}
