//! Collaborator contracts for the custodial payment forwarder.
//!
//! The forwarder never talks to a Lightning backend directly. It orchestrates
//! against the interfaces defined here:
//!
//! - [`CustodialLedger`] - the shared intermediary account that issues every
//!   invoice, publishes settlements, and moves funds onwards
//! - [`RemoteWalletControl`] / [`RemoteWalletConnector`] - a merchant wallet
//!   reached through a wallet-control protocol
//! - [`KeyValueStore`] - persistent storage for memos the ledger cannot round-trip
//!
//! # Example
//!
//! ```rust
//! use ledger_core::{async_trait, CreatedInvoice, CustodialLedger, LedgerError};
//! use ledger_core::{SettlementStream, TransferReceipt, TransferTarget};
//!
//! struct NullLedger;
//!
//! #[async_trait]
//! impl CustodialLedger for NullLedger {
//!     async fn create_invoice(&self, _amount: u64, _memo: &str) -> Result<CreatedInvoice, LedgerError> {
//!         Err(LedgerError::Unsupported("create_invoice".into()))
//!     }
//!     async fn subscribe_settlements(&self) -> Result<SettlementStream, LedgerError> {
//!         Err(LedgerError::Unsupported("subscribe".into()))
//!     }
//!     async fn transfer_internal(
//!         &self,
//!         _to: &TransferTarget,
//!         _amount: u64,
//!         _memo: &str,
//!         _idempotency_key: &str,
//!     ) -> Result<TransferReceipt, LedgerError> {
//!         Err(LedgerError::Unsupported("transfer".into()))
//!     }
//!     async fn pay_invoice(&self, _bolt11: &str) -> Result<TransferReceipt, LedgerError> {
//!         Err(LedgerError::Unsupported("pay".into()))
//!     }
//!     fn name(&self) -> &str {
//!         "null"
//!     }
//! }
//! ```

mod error;
mod ledger;
mod remote;
mod store;
mod types;

pub use error::{LedgerError, StoreError};
pub use ledger::{CustodialLedger, SettlementStream};
pub use remote::{RemoteWalletConnector, RemoteWalletControl};
pub use store::KeyValueStore;
pub use types::{
    CreatedInvoice, InvoiceStatus, LedgerTransaction, Page, RemoteCapabilities,
    RemoteMethod, RemoteTransaction, Settlement, TransferReceipt, TransferTarget, TxDirection, TxState,
    WalletCredential,
};

// Re-export async_trait for implementors
pub use async_trait::async_trait;
