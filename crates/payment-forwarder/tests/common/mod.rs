//! Shared helpers for forwarder scenario tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use mock_ledger::MockLedger;
use payment_forwarder::{
    DestinationResolver, DetectionState, ForwarderConfig, MerchantConfig, PaymentEvent,
    PaymentForwarder, ReconnectConfig, RetryPolicy,
};
use secrecy::SecretString;
use tokio::sync::broadcast;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(2);
pub const QUIET: Duration = Duration::from_millis(50);

/// Millisecond-scale timings so scenarios finish quickly.
pub fn fast_config() -> ForwarderConfig {
    ForwarderConfig::default()
        .with_reconnect(ReconnectConfig {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        })
        .with_poll_interval(Duration::from_millis(5))
        .with_forward_retry(RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        })
        .with_history_timeout(Duration::from_millis(500))
}

pub fn api_key_merchant(wallet_id: &str, api_key: &str) -> MerchantConfig {
    MerchantConfig::ApiKey {
        api_key: SecretString::from(api_key.to_string()),
        wallet_id: wallet_id.to_string(),
    }
}

pub fn forwarder(ledger: &Arc<MockLedger>, merchant: Option<MerchantConfig>) -> PaymentForwarder {
    PaymentForwarder::new(
        ledger.clone(),
        DestinationResolver::new(merchant),
        fast_config(),
    )
}

pub async fn next_event(rx: &mut broadcast::Receiver<PaymentEvent>) -> PaymentEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Asserts nothing arrives for a short while.
pub async fn assert_quiet(rx: &mut broadcast::Receiver<PaymentEvent>) {
    if let Ok(event) = timeout(QUIET, rx.recv()).await {
        panic!("unexpected event: {:?}", event);
    }
}

pub async fn wait_for_detection(forwarder: &PaymentForwarder, state: DetectionState) {
    let handle = forwarder.detection().await.expect("no open session");
    let mut rx = handle.watch_state();
    timeout(WAIT, rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {:?}", state))
        .expect("detection dropped");
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached");
}
