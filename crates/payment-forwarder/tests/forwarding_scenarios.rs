//! End-to-end payment scenarios against the mock ledger.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use ledger_core::{LedgerError, TransferTarget};
use mock_ledger::{MockConnector, MockLedger, MockRemoteWallet};
use payment_forwarder::{
    AttemptState, Capability, ConfigurationError, DestinationKind, DestinationResolver,
    DetectionState, ErrorKind, ForwarderError, InvoiceState, MerchantConfig, PaymentEvent,
    PaymentForwarder, PaymentStatus, ReconnectConfig, WalletDestination,
};
use secrecy::SecretString;

#[tokio::test]
async fn test_paid_then_forwarded_to_api_key_wallet() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(1000, "Table 4").await.unwrap();
    assert_eq!(invoice.amount_minor, 1000);
    assert_eq!(invoice.destination, DestinationKind::ApiKey);
    assert_eq!(
        forwarder.status().await,
        PaymentStatus::AwaitingPayment {
            invoice_hash: invoice.payment_hash.clone()
        }
    );

    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle(&invoice.payment_hash, 1000, Some("Table 4"));

    match next_event(&mut events).await {
        PaymentEvent::Paid {
            invoice_hash,
            amount_minor,
            memo,
        } => {
            assert_eq!(invoice_hash, invoice.payment_hash);
            assert_eq!(amount_minor, 1000);
            assert_eq!(memo, "Table 4");
        }
        other => panic!("expected paid, got {:?}", other),
    }

    match next_event(&mut events).await {
        PaymentEvent::Forwarded { attempt } => {
            assert_eq!(attempt.state, AttemptState::Succeeded);
            assert_eq!(attempt.attempt_count, 1);
        }
        other => panic!("expected forwarded, got {:?}", other),
    }

    let transfers = ledger.transfers();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].target, TransferTarget::Wallet("wallet-1".into()));
    assert_eq!(transfers[0].amount_minor, 1000);

    assert!(matches!(
        forwarder.status().await,
        PaymentStatus::Forwarded { .. }
    ));
    assert_eq!(forwarder.detection_state().await, DetectionState::Closed);
    assert_eq!(ledger.active_subscribers(), 0);
}

#[tokio::test]
async fn test_foreign_settlement_produces_no_events() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(1000, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;

    // Another merchant's invoice on the same shared account.
    let other = format!("{:064x}", 999_999u64);
    assert!(ledger.settle(&other, 5000, Some("someone else")) > 0);

    assert_quiet(&mut events).await;
    assert_eq!(forwarder.detection_state().await, DetectionState::Armed);
    assert_eq!(
        forwarder.status().await,
        PaymentStatus::AwaitingPayment {
            invoice_hash: invoice.payment_hash
        }
    );
    assert!(ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_duplicate_settlements_deliver_one_paid() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(42, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle(&invoice.payment_hash, 42, None);
    ledger.settle(&invoice.payment_hash, 42, None);

    assert!(matches!(next_event(&mut events).await, PaymentEvent::Paid { .. }));
    assert!(matches!(
        next_event(&mut events).await,
        PaymentEvent::Forwarded { .. }
    ));
    assert_quiet(&mut events).await;
    assert_eq!(ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_concurrent_forward_for_same_hash_succeeds_once() {
    let ledger = Arc::new(MockLedger::new().with_transfer_delay(Duration::from_millis(20)));
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let destination = forwarder.resolve_active().await.unwrap();
    let engine = forwarder.engine();

    let (first, second) = tokio::join!(
        engine.forward("hash-1", 100, "", &destination),
        engine.forward("hash-1", 100, "", &destination),
    );

    let results = [first, second];
    let succeeded = results
        .iter()
        .filter(|r| matches!(r, Ok(a) if a.state == AttemptState::Succeeded))
        .count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(ForwarderError::DuplicateForward { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 1);
    assert_eq!(ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_second_open_is_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));

    let first = forwarder.open_invoice(10, "").await.unwrap();
    let err = forwarder.open_invoice(20, "").await.unwrap_err();
    assert!(matches!(err, ForwarderError::SessionAlreadyOpen(ref hash) if *hash == first.payment_hash));
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(ledger.invoices_created(), 1);

    forwarder.close().await;
    forwarder.open_invoice(20, "").await.unwrap();
    assert_eq!(ledger.invoices_created(), 2);
}

#[tokio::test]
async fn test_no_destination_refuses_invoice() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, None);

    let err = forwarder.open_invoice(10, "").await.unwrap_err();
    assert!(matches!(
        err,
        ForwarderError::Configuration(ConfigurationError::NoActiveDestination)
    ));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(ledger.invoices_created(), 0);
    assert_eq!(ledger.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_invalid_amount_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));

    assert!(matches!(
        forwarder.open_invoice(0, "").await,
        Err(ForwarderError::InvalidAmount(0))
    ));
    assert_eq!(forwarder.status().await, PaymentStatus::Idle);
}

#[tokio::test]
async fn test_close_stops_events_and_is_idempotent() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(10, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    let detection = forwarder.detection().await.unwrap();

    forwarder.close().await;
    forwarder.close().await;

    ledger.settle(&invoice.payment_hash, 10, None);
    assert_quiet(&mut events).await;
    wait_until(|| detection.state() == DetectionState::Closed).await;
    assert_eq!(ledger.active_subscribers(), 0);
    assert!(ledger.transfers().is_empty());
    assert_eq!(forwarder.detection_state().await, DetectionState::Idle);
    assert_eq!(forwarder.status().await, PaymentStatus::Idle);
}

#[tokio::test]
async fn test_close_during_forwarding_suppresses_outcome() {
    let ledger = Arc::new(MockLedger::new().with_transfer_delay(Duration::from_millis(30)));
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(10, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle(&invoice.payment_hash, 10, None);
    assert!(matches!(next_event(&mut events).await, PaymentEvent::Paid { .. }));

    forwarder.close().await;

    // The funds already moved, so forwarding still completes.
    wait_until(|| ledger.transfers().len() == 1).await;
    assert_quiet(&mut events).await;
    let attempt = forwarder.engine().attempt(&invoice.payment_hash).unwrap();
    assert_eq!(attempt.state, AttemptState::Succeeded);
}

#[tokio::test]
async fn test_terminal_failure_then_manual_retry() {
    let ledger = Arc::new(MockLedger::new());
    ledger.script_transfer_errors([LedgerError::Unauthorized("wallet locked".into())]);
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(700, "Order 9").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);

    assert!(matches!(next_event(&mut events).await, PaymentEvent::Paid { .. }));
    match next_event(&mut events).await {
        PaymentEvent::ForwardingFailed { attempt, error } => {
            assert_eq!(attempt.state, AttemptState::Failed);
            assert_eq!(attempt.attempt_count, 1);
            assert!(matches!(
                attempt.last_error,
                Some(LedgerError::Unauthorized(_))
            ));
            assert!(error.contains("wallet locked"));
        }
        other => panic!("expected forwarding failure, got {:?}", other),
    }

    // Stuck funds are distinct from "no payment yet".
    assert!(matches!(
        forwarder.status().await,
        PaymentStatus::ForwardingFailed { .. }
    ));

    let attempt = forwarder
        .retry_forwarding(&invoice.payment_hash)
        .await
        .unwrap();
    assert_eq!(attempt.state, AttemptState::Succeeded);
    assert_eq!(attempt.attempt_count, 2);
    assert_eq!(attempt.history.len(), 2);
    assert_eq!(attempt.memo, "Order 9");

    assert!(matches!(
        next_event(&mut events).await,
        PaymentEvent::Forwarded { .. }
    ));
    assert!(matches!(
        forwarder.status().await,
        PaymentStatus::Forwarded { .. }
    ));

    let err = forwarder
        .retry_forwarding(&invoice.payment_hash)
        .await
        .unwrap_err();
    assert!(matches!(err, ForwarderError::DuplicateForward { .. }));
    assert_eq!(ledger.transfers().len(), 1);
}

#[tokio::test]
async fn test_stuck_funds_reported_after_close() {
    let ledger = Arc::new(MockLedger::new());
    ledger.script_transfer_errors([LedgerError::Unreachable("no such wallet".into())]);
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(5, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);
    next_event(&mut events).await;
    next_event(&mut events).await;

    forwarder.close().await;
    match forwarder.status().await {
        PaymentStatus::ForwardingFailed { attempt } => {
            assert_eq!(attempt.invoice_hash, invoice.payment_hash)
        }
        other => panic!("expected stuck funds, got {:?}", other),
    }
}

#[tokio::test]
async fn test_reconnect_backoff_and_manual_reset() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_subscriptions_failing(true);
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));

    forwarder.open_invoice(10, "").await.unwrap();

    // Three backoff waits, then the fourth failure parks the channel.
    wait_until(|| ledger.subscribe_calls() == 4).await;
    wait_for_detection(&forwarder, DetectionState::Reconnecting).await;
    assert_eq!(forwarder.reconnect_attempts().await, 3);

    let history = forwarder.backoff_history().await;
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|pair| pair[0] <= pair[1]));

    ledger.set_subscriptions_failing(false);
    forwarder.reconnect().await.unwrap();
    assert_eq!(forwarder.reconnect_attempts().await, 0);

    wait_for_detection(&forwarder, DetectionState::Armed).await;
    assert_eq!(ledger.subscribe_calls(), 5);
    assert_eq!(forwarder.reconnect_attempts().await, 0);
}

#[tokio::test]
async fn test_reconnect_without_session() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));

    assert!(matches!(
        forwarder.reconnect().await,
        Err(ForwarderError::NoOpenSession)
    ));
    assert_eq!(forwarder.detection_state().await, DetectionState::Idle);
    assert_eq!(ledger.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_polling_ledger_detects_payment() {
    let ledger = Arc::new(MockLedger::new().without_push());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(300, "Polled").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Polling).await;
    ledger.settle_invoice(&invoice.payment_hash);

    match next_event(&mut events).await {
        PaymentEvent::Paid {
            amount_minor, memo, ..
        } => {
            assert_eq!(amount_minor, 300);
            assert_eq!(memo, "Polled");
        }
        other => panic!("expected paid, got {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        PaymentEvent::Forwarded { .. }
    ));
    assert_eq!(ledger.subscribe_calls(), 0);
}

#[tokio::test]
async fn test_polled_invoice_expires() {
    let ledger = Arc::new(MockLedger::new().without_push());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(300, "").await.unwrap();
    ledger.expire_invoice(&invoice.payment_hash);

    wait_for_detection(&forwarder, DetectionState::Closed).await;
    assert_quiet(&mut events).await;
    assert_eq!(forwarder.status().await, PaymentStatus::Idle);

    // An expired session does not block the next invoice.
    forwarder.open_invoice(300, "").await.unwrap();
}

#[tokio::test]
async fn test_mailbox_forwards_to_address() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(
        &ledger,
        Some(MerchantConfig::EcashMailbox {
            address: "shop@mint.example".into(),
        }),
    );
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(64, "").await.unwrap();
    assert_eq!(invoice.destination, DestinationKind::EcashMailbox);
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);

    next_event(&mut events).await;
    assert!(matches!(
        next_event(&mut events).await,
        PaymentEvent::Forwarded { .. }
    ));
    assert_eq!(
        ledger.transfers()[0].target,
        TransferTarget::Address("shop@mint.example".into())
    );
}

#[tokio::test]
async fn test_lightning_address_forward_only() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(
        &ledger,
        Some(MerchantConfig::LightningAddress {
            address: "shop@example.com".into(),
            wallet_id: "wallet-7".into(),
        }),
    );

    let destination = forwarder.resolve_active().await.unwrap();
    assert!(matches!(destination, WalletDestination::LightningAddress(_)));

    let err = forwarder
        .request_destination_invoice(1000, "direct")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ForwarderError::UnsupportedOperation {
            operation: Capability::CreateInvoice,
            destination: DestinationKind::LightningAddress,
        }
    ));
    assert_eq!(ledger.invoices_created(), 0);

    // Custodial invoices still work and forward internally.
    let mut events = forwarder.subscribe();
    let invoice = forwarder.open_invoice(1000, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);
    next_event(&mut events).await;
    next_event(&mut events).await;
    assert_eq!(
        ledger.transfers()[0].target,
        TransferTarget::Wallet("wallet-7".into())
    );
}

#[tokio::test]
async fn test_remote_wallet_forwarding_pays_one_remote_invoice() {
    let ledger = Arc::new(MockLedger::new());
    ledger.script_payment_errors([LedgerError::Timeout]);
    let remote = Arc::new(MockRemoteWallet::full());
    let connector = Arc::new(MockConnector::new());
    connector.register("wallet+control://shop", remote.clone());

    let resolver = DestinationResolver::new(Some(MerchantConfig::RemoteControl {
        connection_uri: SecretString::from("wallet+control://shop"),
    }))
    .with_connector(connector);
    let forwarder = PaymentForwarder::new(ledger.clone(), resolver, fast_config());
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(2100, "Remote order").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);

    next_event(&mut events).await;
    match next_event(&mut events).await {
        PaymentEvent::Forwarded { attempt } => {
            assert_eq!(attempt.attempt_count, 2);
            assert_eq!(attempt.destination, DestinationKind::RemoteControl);
        }
        other => panic!("expected forwarded, got {:?}", other),
    }

    let issued = remote.issued_invoices();
    assert_eq!(issued.len(), 1);
    assert_eq!(ledger.payments(), vec![issued[0].payment_request.clone()]);
    assert!(ledger.transfers().is_empty());
}

#[tokio::test]
async fn test_session_state_tracks_pipeline() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(10, "").await.unwrap();
    assert_eq!(invoice.state, InvoiceState::Open);
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);
    next_event(&mut events).await;
    next_event(&mut events).await;

    // A finished session does not block the next invoice.
    let next = forwarder.open_invoice(11, "").await.unwrap();
    assert_ne!(next.payment_hash, invoice.payment_hash);
}

#[tokio::test]
async fn test_close_during_reconnect_backoff() {
    let ledger = Arc::new(MockLedger::new());
    ledger.set_subscriptions_failing(true);
    let config = fast_config().with_reconnect(ReconnectConfig {
        max_retries: None,
        initial_delay: Duration::from_secs(10),
        max_delay: Duration::from_secs(10),
        backoff_multiplier: 2.0,
    });
    let forwarder = PaymentForwarder::new(
        ledger.clone(),
        DestinationResolver::new(Some(api_key_merchant("wallet-1", "key-1"))),
        config,
    );
    let mut events = forwarder.subscribe();

    forwarder.open_invoice(10, "").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Reconnecting).await;
    let detection = forwarder.detection().await.unwrap();

    forwarder.close().await;
    let mut state = detection.watch_state();
    tokio::time::timeout(
        Duration::from_millis(500),
        state.wait_for(|s| *s == DetectionState::Closed),
    )
    .await
    .expect("close waited out the backoff")
    .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(ledger.subscribe_calls(), 1);
    assert_quiet(&mut events).await;
}

#[tokio::test]
async fn test_stuck_funds_visible_while_next_invoice_awaits_payment() {
    let ledger = Arc::new(MockLedger::new());
    ledger.script_transfer_errors([LedgerError::Unreachable("no such wallet".into())]);
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));
    let mut events = forwarder.subscribe();

    let first = forwarder.open_invoice(40, "first").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&first.payment_hash);
    next_event(&mut events).await;
    next_event(&mut events).await;

    let second = forwarder.open_invoice(50, "second").await.unwrap();
    assert_eq!(
        forwarder.status().await,
        PaymentStatus::AwaitingPayment {
            invoice_hash: second.payment_hash.clone()
        }
    );

    let stuck = forwarder.stuck_funds();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].invoice_hash, first.payment_hash);
    assert_eq!(stuck[0].amount_minor, 40);
}

#[tokio::test]
async fn test_retry_of_unknown_invoice_is_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let forwarder = forwarder(&ledger, Some(api_key_merchant("wallet-1", "key-1")));

    let err = forwarder.retry_forwarding("never-seen").await.unwrap_err();
    assert!(matches!(err, ForwarderError::UnknownInvoice(ref hash) if hash == "never-seen"));
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_remote_payment_confirmed_after_lost_response() {
    let ledger = Arc::new(MockLedger::new());
    let remote = Arc::new(MockRemoteWallet::full());
    ledger.route_payments_to(remote.clone());
    // The payment lands on the remote wallet but its response is lost.
    ledger.script_lost_payment_acks([LedgerError::Timeout]);
    let connector = Arc::new(MockConnector::new());
    connector.register("wallet+control://shop", remote.clone());

    let resolver = DestinationResolver::new(Some(MerchantConfig::RemoteControl {
        connection_uri: SecretString::from("wallet+control://shop"),
    }))
    .with_connector(connector);
    let forwarder = PaymentForwarder::new(ledger.clone(), resolver, fast_config());
    let mut events = forwarder.subscribe();

    let invoice = forwarder.open_invoice(900, "Remote order").await.unwrap();
    wait_for_detection(&forwarder, DetectionState::Armed).await;
    ledger.settle_invoice(&invoice.payment_hash);

    next_event(&mut events).await;
    let issued = remote.issued_invoices();
    match next_event(&mut events).await {
        PaymentEvent::Forwarded { attempt } => {
            assert_eq!(attempt.attempt_count, 2);
            assert_eq!(attempt.reference.as_deref(), Some(issued[0].payment_hash.as_str()));
        }
        other => panic!("expected forwarded, got {:?}", other),
    }
    assert_eq!(issued.len(), 1);
    assert_eq!(ledger.payments().len(), 1);
}
