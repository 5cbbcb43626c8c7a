//! Mock collaborators for exercising the payment forwarder.
//!
//! This crate provides in-memory implementations of the `ledger-core` contracts:
//! - `MockLedger` - A shared custodial account with a multi-tenant settlement feed
//! - `MockRemoteWallet` / `MockConnector` - Remote-control wallets with a chosen capability set
//! - `MemoryStore` - A key-value store backed by a `HashMap`
//!
//! Failures are scripted ahead of time, so tests can drive reconnects,
//! transient transfer errors, and terminal forwarding failures deterministically.
//!
//! # Example
//!
//! ```rust
//! use futures::StreamExt;
//! use mock_ledger::{CustodialLedger, MockLedger};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ledger_core::LedgerError> {
//!     let ledger = MockLedger::new();
//!     let invoice = ledger.create_invoice(1_000, "Coffee").await?;
//!
//!     let mut feed = ledger.subscribe_settlements().await?;
//!     ledger.settle_invoice(&invoice.payment_hash);
//!
//!     let settlement = feed.next().await.unwrap()?;
//!     assert_eq!(settlement.amount_minor, 1_000);
//!     Ok(())
//! }
//! ```

mod ledger;
mod remote;
mod store;

// Re-export ledger-core contracts for convenience
pub use ledger_core::{async_trait, CustodialLedger, KeyValueStore, RemoteWalletConnector, RemoteWalletControl};

pub use ledger::{MockLedger, RecordedTransfer};
pub use remote::{MockConnector, MockRemoteWallet};
pub use store::MemoryStore;
