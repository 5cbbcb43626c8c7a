//! Lightning payment forwarding for merchants whose wallets cannot receive
//! invoices directly.
//!
//! Invoices are issued on a shared custodial ledger account. Once one
//! settles, the funds are forwarded to the merchant's real destination: a
//! ledger wallet, a Lightning address, a remote-control wallet or an ecash
//! mailbox. A companion aggregator reads the destination's history into one
//! canonical transaction model.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use payment_forwarder::{
//!     DestinationResolver, ForwarderConfig, MerchantConfig, PaymentEvent, PaymentForwarder,
//! };
//!
//! # async fn example(ledger: Arc<dyn ledger_core::CustodialLedger>) -> payment_forwarder::Result<()> {
//! let resolver = DestinationResolver::new(MerchantConfig::from_env()?);
//! let forwarder = PaymentForwarder::new(ledger, resolver, ForwarderConfig::from_env()?);
//!
//! let mut events = forwarder.subscribe();
//! let invoice = forwarder.open_invoice(1000, "Table 4").await?;
//! println!("Pay {}", invoice.payment_request);
//!
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         PaymentEvent::Paid { amount_minor, .. } => println!("Received {}", amount_minor),
//!         PaymentEvent::Forwarded { .. } => break,
//!         PaymentEvent::ForwardingFailed { error, .. } => {
//!             eprintln!("Forwarding failed: {}", error);
//!             break;
//!         }
//!     }
//! }
//! forwarder.close().await;
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod config;
pub mod destination;
pub mod detection;
pub mod error;
pub mod events;
pub mod forwarder;
pub mod forwarding;
pub mod memo_cache;
pub mod normalize;
pub mod session;

pub use aggregator::{Availability, TransactionAggregator, TransactionPage};
pub use config::{ForwarderConfig, MerchantConfig, ReconnectConfig, RetryPolicy};
pub use destination::{
    ApiKeyWallet, Capability, CapabilitySet, DestinationKind, DestinationResolver,
    EcashMailboxWallet, LightningAddressWallet, RemoteControlWallet, WalletDestination,
};
pub use detection::{DetectionChannel, DetectionHandle, DetectionOutcome, DetectionState};
pub use error::{ConfigurationError, ErrorKind, ForwarderError, Result};
pub use events::{EventBus, PaymentEvent, PaymentStatus};
pub use forwarder::PaymentForwarder;
pub use forwarding::{AttemptRecord, AttemptState, ForwardingAttempt, ForwardingEngine};
pub use memo_cache::MemoCache;
pub use normalize::{CanonicalTransaction, Direction, TransactionSource, TxStatus};
pub use session::{Invoice, InvoiceSession, InvoiceState};

/// Crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
