//! The custodial ledger contract.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::LedgerError;
use crate::types::{
    CreatedInvoice, InvoiceStatus, LedgerTransaction, Page, Settlement, TransferReceipt,
    TransferTarget, WalletCredential,
};

/// A live settlement feed. Ends or yields an error when the transport drops.
pub type SettlementStream = Pin<Box<dyn Stream<Item = Result<Settlement, LedgerError>> + Send>>;

/// The shared intermediary Lightning account.
///
/// Every invoice is issued against this one account, so its settlement feed
/// carries payments for all concurrent merchant sessions. Callers are
/// responsible for filtering the feed by payment hash.
///
/// This trait is object-safe and is normally held as `Arc<dyn CustodialLedger>`.
#[async_trait]
pub trait CustodialLedger: Send + Sync {
    /// Issue an invoice on the shared account.
    async fn create_invoice(&self, amount_minor: u64, memo: &str)
        -> Result<CreatedInvoice, LedgerError>;

    /// Open a connection to the shared settlement feed.
    async fn subscribe_settlements(&self) -> Result<SettlementStream, LedgerError>;

    /// Move funds from the shared account to another identity on the same ledger.
    ///
    /// The ledger must commit at most one transfer per `idempotency_key`. A
    /// repeated request with a key it already committed returns the original
    /// receipt, so a caller that lost the response may safely resend.
    async fn transfer_internal(
        &self,
        to: &TransferTarget,
        amount_minor: u64,
        memo: &str,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, LedgerError>;

    /// Pay a BOLT11 invoice from the shared account.
    async fn pay_invoice(&self, bolt11: &str) -> Result<TransferReceipt, LedgerError>;

    /// Human-readable name of the ledger backend.
    fn name(&self) -> &str;

    /// Whether [`subscribe_settlements`](Self::subscribe_settlements) is
    /// available. Ledgers without a push feed are polled through
    /// [`lookup_invoice`](Self::lookup_invoice) instead.
    fn supports_push(&self) -> bool {
        true
    }

    /// Look up an invoice issued on the shared account.
    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus, LedgerError> {
        Err(LedgerError::Unsupported(format!(
            "lookup_invoice({})",
            payment_hash
        )))
    }

    /// Issue an invoice on a merchant's own wallet using its credentials.
    async fn create_wallet_invoice(
        &self,
        credential: WalletCredential<'_>,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        let _ = (amount_minor, memo);
        Err(LedgerError::Unsupported(format!(
            "create_wallet_invoice({})",
            credential.wallet_id
        )))
    }

    /// List a merchant wallet's transactions using its credentials.
    async fn list_wallet_transactions(
        &self,
        credential: WalletCredential<'_>,
        cursor: Option<&str>,
    ) -> Result<Page<LedgerTransaction>, LedgerError> {
        let _ = cursor;
        Err(LedgerError::Unsupported(format!(
            "list_wallet_transactions({})",
            credential.wallet_id
        )))
    }
}
