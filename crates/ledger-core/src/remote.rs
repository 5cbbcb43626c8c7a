//! Contracts for wallets reached through a wallet-control protocol.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LedgerError;
use crate::types::{CreatedInvoice, InvoiceStatus, Page, RemoteCapabilities, RemoteTransaction};

/// A connected remote-control wallet.
///
/// Which methods actually work depends on what the wallet advertised;
/// callers must consult [`get_capabilities`](Self::get_capabilities) before
/// invoking anything beyond it.
#[async_trait]
pub trait RemoteWalletControl: Send + Sync {
    /// Methods the wallet advertises.
    async fn get_capabilities(&self) -> Result<RemoteCapabilities, LedgerError>;

    /// Ask the wallet to issue an invoice payable to itself.
    async fn create_invoice(
        &self,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError>;

    /// Check the state of an invoice the wallet issued.
    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus, LedgerError>;

    /// Page through the wallet's transaction history.
    async fn list_transactions(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<RemoteTransaction>, LedgerError>;
}

/// Opens connections to remote-control wallets from a connection URI.
#[async_trait]
pub trait RemoteWalletConnector: Send + Sync {
    async fn connect(
        &self,
        connection_uri: &str,
    ) -> Result<Arc<dyn RemoteWalletControl>, LedgerError>;
}
