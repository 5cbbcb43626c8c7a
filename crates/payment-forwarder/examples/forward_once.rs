//! Issue one invoice, wait for payment, and forward it.
//!
//! Run with: cargo run -p payment-forwarder --example forward_once -- 1000 "Table 4"
//!
//! Configuration via .env file or environment variables:
//!   LEDGER_URL            - Custodial ledger base URL (required)
//!   LEDGER_API_KEY        - Shared account API key (required)
//!   FORWARD_DESTINATION   - api_key | lightning_address | ecash_mailbox
//!   MEMO_DB_URL           - SQLite URL (default: sqlite:memo_cache.db?mode=rwc)

use std::env;
use std::sync::Arc;

use ledger_client::{LedgerClient, LedgerConfig};
use memo_store::MemoStore;
use payment_forwarder::{
    DestinationResolver, ForwarderConfig, MerchantConfig, PaymentEvent, PaymentForwarder,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (searches current dir and parents)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = env::args().skip(1);
    let amount: i64 = args.next().as_deref().unwrap_or("1000").parse()?;
    let memo = args.next().unwrap_or_else(|| "Demo payment".to_string());

    let ledger = LedgerClient::connect(LedgerConfig::from_env()?).await?;
    println!("Connected to ledger at {}", ledger.config().base_url);

    let store = MemoStore::from_env().await?;
    store.migrate().await?;

    let resolver = DestinationResolver::new(MerchantConfig::from_env()?);
    let forwarder = PaymentForwarder::new(Arc::new(ledger), resolver, ForwarderConfig::from_env()?)
        .with_memo_store(Arc::new(store));

    let destination = forwarder.resolve_active().await?;
    println!("Forwarding to {}", destination.label());

    let mut events = forwarder.subscribe();
    let invoice = forwarder.open_invoice(amount, &memo).await?;
    println!("\nPay this invoice ({} sats):\n{}\n", invoice.amount_minor, invoice.payment_request);
    println!("Press Ctrl+C to give up.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("Cancelled");
                break;
            }
            event = events.recv() => match event? {
                PaymentEvent::Paid { amount_minor, memo, .. } => {
                    println!("Received {} sats ({}), forwarding...", amount_minor, memo);
                }
                PaymentEvent::Forwarded { attempt } => {
                    println!(
                        "Forwarded after {} attempt(s), reference {}",
                        attempt.attempt_count,
                        attempt.reference.as_deref().unwrap_or("-")
                    );
                    break;
                }
                PaymentEvent::ForwardingFailed { attempt, error } => {
                    eprintln!(
                        "Forwarding failed for {}: {}. Funds remain on the custodial account.",
                        attempt.invoice_hash, error
                    );
                    break;
                }
            }
        }
    }

    forwarder.close().await;
    Ok(())
}
