//! Watches the custodial ledger for the settlement of one invoice.
//!
//! The ledger's settlement feed is shared by every merchant session on the
//! account, so a channel is armed with exactly one expected hash and drops
//! everything else. Ledgers without a push feed are polled instead; the
//! outcome is the same either way.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use ledger_core::{CustodialLedger, InvoiceStatus, Settlement};
use tokio::sync::watch;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ReconnectConfig;

/// Where a detection channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    Idle,
    Connecting,
    /// Waiting out a backoff delay, or parked after the retry limit.
    Reconnecting,
    /// Connected with the expected hash registered.
    Armed,
    /// Examining a settlement notification.
    Observing,
    /// Polling invoice status in place of a feed.
    Polling,
    Matched,
    Closed,
}

/// How detection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectionOutcome {
    Paid(Settlement),
    Expired,
    Cancelled,
}

struct Shared {
    state: watch::Sender<DetectionState>,
    attempts: AtomicU32,
    backoff_history: Mutex<Vec<Duration>>,
    /// Bumped on every manual reconnect request.
    reconnect_requests: watch::Sender<u64>,
}

/// Observe and steer a running [`DetectionChannel`].
#[derive(Clone)]
pub struct DetectionHandle {
    shared: Arc<Shared>,
}

impl DetectionHandle {
    pub fn state(&self) -> DetectionState {
        *self.shared.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn watch_state(&self) -> watch::Receiver<DetectionState> {
        self.shared.state.subscribe()
    }

    /// Consecutive failed connection attempts since the last success.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Every backoff delay waited so far, in order.
    pub fn backoff_history(&self) -> Vec<Duration> {
        self.shared
            .backoff_history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Reset the attempt counter and reconnect without waiting.
    ///
    /// A request made while a connection is being established is satisfied
    /// by that connection; it never tears down the feed that results.
    pub fn reconnect(&self) {
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.reconnect_requests.send_modify(|generation| *generation += 1);
    }

    pub(crate) fn mark_closed(&self) {
        self.shared.state.send_replace(DetectionState::Closed);
    }
}

/// A detection channel armed with one expected hash.
pub struct DetectionChannel {
    ledger: Arc<dyn CustodialLedger>,
    expected_hash: String,
    cancel: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    poll_interval: Duration,
    deadline: Instant,
    shared: Arc<Shared>,
}

impl DetectionChannel {
    /// Prepare a channel. Nothing connects until [`run`](Self::run).
    pub fn new(
        ledger: Arc<dyn CustodialLedger>,
        expected_hash: impl Into<String>,
        cancel: watch::Receiver<bool>,
        expires_in: Duration,
    ) -> Self {
        let (state, _) = watch::channel(DetectionState::Idle);
        let (reconnect_requests, _) = watch::channel(0);
        Self {
            ledger,
            expected_hash: expected_hash.into(),
            cancel,
            reconnect: ReconnectConfig::default(),
            poll_interval: Duration::from_secs(5),
            deadline: Instant::now() + expires_in,
            shared: Arc::new(Shared {
                state,
                attempts: AtomicU32::new(0),
                backoff_history: Mutex::new(Vec::new()),
                reconnect_requests,
            }),
        }
    }

    /// Builder method to set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn handle(&self) -> DetectionHandle {
        DetectionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    fn set_state(&self, state: DetectionState) {
        let previous = self.shared.state.send_replace(state);
        if previous != state {
            debug!(hash = %self.expected_hash, from = ?previous, to = ?state, "Detection state changed");
        }
    }

    /// Run until the expected hash settles, the invoice expires, or the
    /// owning session closes.
    pub async fn run(mut self) -> DetectionOutcome {
        let outcome = if self.ledger.supports_push() {
            self.run_feed().await
        } else {
            self.run_polling().await
        };

        match &outcome {
            DetectionOutcome::Paid(_) => self.set_state(DetectionState::Matched),
            DetectionOutcome::Expired | DetectionOutcome::Cancelled => {
                self.set_state(DetectionState::Closed)
            }
        }
        outcome
    }

    async fn run_feed(&mut self) -> DetectionOutcome {
        let shared = Arc::clone(&self.shared);
        let mut requests = shared.reconnect_requests.subscribe();

        loop {
            if is_cancelled(&self.cancel) {
                return DetectionOutcome::Cancelled;
            }

            self.set_state(DetectionState::Connecting);
            let connected = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return DetectionOutcome::Cancelled,
                _ = sleep_until(self.deadline) => return self.expired(),
                result = self.ledger.subscribe_settlements() => result,
            };

            let mut manual = false;
            match connected {
                Ok(mut feed) => {
                    // Requests that arrived while connecting are served by this feed.
                    requests.borrow_and_update();
                    shared.attempts.store(0, Ordering::SeqCst);
                    info!(hash = %self.expected_hash, ledger = self.ledger.name(), "Settlement feed connected");
                    self.set_state(DetectionState::Armed);

                    loop {
                        let item = tokio::select! {
                            biased;
                            _ = cancelled(&mut self.cancel) => return DetectionOutcome::Cancelled,
                            _ = sleep_until(self.deadline) => return self.expired(),
                            _ = reconnect_requested(&mut requests) => {
                                info!(hash = %self.expected_hash, "Manual reconnect requested");
                                manual = true;
                                break;
                            }
                            item = feed.next() => item,
                        };

                        match item {
                            Some(Ok(settlement)) => {
                                self.set_state(DetectionState::Observing);
                                if settlement.payment_hash == self.expected_hash {
                                    info!(
                                        hash = %settlement.payment_hash,
                                        amount_minor = settlement.amount_minor,
                                        "Settlement matched"
                                    );
                                    return DetectionOutcome::Paid(settlement);
                                }
                                debug!(foreign_hash = %settlement.payment_hash, "Ignoring settlement for another session");
                                self.set_state(DetectionState::Armed);
                            }
                            Some(Err(e)) => {
                                warn!(hash = %self.expected_hash, "Settlement feed error: {}", e);
                                break;
                            }
                            None => {
                                warn!(hash = %self.expected_hash, "Settlement feed ended");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(hash = %self.expected_hash, "Failed to connect to settlement feed: {}", e);
                }
            }

            if manual {
                continue;
            }

            let attempt = shared.attempts.load(Ordering::SeqCst);
            self.set_state(DetectionState::Reconnecting);

            if !self.reconnect.should_retry(attempt) {
                warn!(
                    hash = %self.expected_hash,
                    attempts = attempt,
                    "Reconnect limit reached, waiting for manual reconnect"
                );
                tokio::select! {
                    biased;
                    _ = cancelled(&mut self.cancel) => return DetectionOutcome::Cancelled,
                    _ = sleep_until(self.deadline) => return self.expired(),
                    _ = reconnect_requested(&mut requests) => {
                        shared.attempts.store(0, Ordering::SeqCst);
                        continue;
                    }
                }
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            // A manual reset since the load wins over this increment.
            if shared
                .attempts
                .compare_exchange(attempt, attempt + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                requests.borrow_and_update();
                continue;
            }
            shared
                .backoff_history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(delay);
            info!(
                hash = %self.expected_hash,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting to settlement feed"
            );

            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return DetectionOutcome::Cancelled,
                _ = reconnect_requested(&mut requests) => {
                    shared.attempts.store(0, Ordering::SeqCst);
                }
                _ = sleep(delay) => {}
            }
        }
    }

    async fn run_polling(&mut self) -> DetectionOutcome {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(hash = %self.expected_hash, poll_interval = ?self.poll_interval, "Polling invoice status");
        self.set_state(DetectionState::Polling);

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => return DetectionOutcome::Cancelled,
                _ = sleep_until(self.deadline) => return self.expired(),
                _ = ticker.tick() => {}
            }

            match self.ledger.lookup_invoice(&self.expected_hash).await {
                Ok(InvoiceStatus::Settled { amount_minor, .. }) => {
                    info!(hash = %self.expected_hash, amount_minor, "Invoice settled");
                    return DetectionOutcome::Paid(Settlement {
                        payment_hash: self.expected_hash.clone(),
                        amount_minor,
                        memo: None,
                    });
                }
                Ok(InvoiceStatus::Expired) => return self.expired(),
                Ok(InvoiceStatus::Pending) => {}
                Err(e) => {
                    // Keep polling despite errors
                    warn!(hash = %self.expected_hash, "Invoice lookup failed: {}", e);
                }
            }
        }
    }

    fn expired(&self) -> DetectionOutcome {
        info!(hash = %self.expected_hash, "Invoice expired unpaid");
        DetectionOutcome::Expired
    }
}

fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolves on the next manual reconnect request.
async fn reconnect_requested(requests: &mut watch::Receiver<u64>) {
    if requests.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Resolves once the session is closed or its owner is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
