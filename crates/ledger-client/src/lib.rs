//! Custodial ledger client library.
//!
//! This crate implements [`ledger_core::CustodialLedger`] over a custodial
//! ledger's REST API. It supports:
//!
//! - Issuing invoices on the shared account and on merchant wallets
//! - Receiving settlements via Server-Sent Events (SSE)
//! - Internal transfers and BOLT11 payments from the shared account
//! - Paging through a merchant wallet's history
//!
//! # Example
//!
//! ```no_run
//! use ledger_client::{LedgerClient, LedgerConfig};
//! use ledger_core::CustodialLedger;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LedgerConfig::new("https://ledger.example.com", "shared-account-key");
//! let client = LedgerClient::connect(config).await?;
//!
//! let invoice = client.create_invoice(1_000, "Coffee").await?;
//! println!("Pay {}", invoice.payment_request);
//!
//! use futures::StreamExt;
//! let mut feed = client.subscribe_settlements().await?;
//! while let Some(result) = feed.next().await {
//!     match result {
//!         Ok(settlement) => println!("settled {}", settlement.payment_hash),
//!         Err(e) => eprintln!("feed error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod sse;
pub mod types;

pub use client::LedgerClient;
pub use config::LedgerConfig;
pub use error::ClientError;
pub use sse::SettlementFeed;

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
