//! Transaction history for the active destination.

use std::sync::Arc;
use std::time::Duration;

use ledger_core::{CustodialLedger, LedgerError};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::destination::{HistorySource, WalletDestination};
use crate::error::{ConfigurationError, ForwarderError, Result};
use crate::memo_cache::MemoCache;
use crate::normalize::{self, CanonicalTransaction};

/// Whether a destination can report history at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// The destination has no history capability. Permanent, not an error.
    Unsupported,
}

/// One page of canonical history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub transactions: Vec<CanonicalTransaction>,
    /// Opaque; pass back to fetch the next page.
    pub next_cursor: Option<String>,
    pub availability: Availability,
}

impl TransactionPage {
    pub fn unsupported() -> Self {
        Self {
            transactions: Vec::new(),
            next_cursor: None,
            availability: Availability::Unsupported,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.availability == Availability::Unsupported
    }
}

/// Reads history from whichever backend is authoritative for a destination.
///
/// Independent of the payment path: each call is bounded by its own timeout
/// and shares nothing with detection or forwarding.
pub struct TransactionAggregator {
    ledger: Arc<dyn CustodialLedger>,
    memos: Option<MemoCache>,
    timeout: Duration,
}

impl TransactionAggregator {
    pub fn new(ledger: Arc<dyn CustodialLedger>, timeout: Duration) -> Self {
        Self {
            ledger,
            memos: None,
            timeout,
        }
    }

    /// Builder method to resolve memos from the cache.
    pub fn with_memo_cache(mut self, memos: MemoCache) -> Self {
        self.memos = Some(memos);
        self
    }

    /// List one page of the destination's history.
    ///
    /// Destinations without a history capability get an empty page flagged
    /// unsupported, never an error.
    pub async fn list(
        &self,
        destination: &WalletDestination,
        cursor: Option<&str>,
    ) -> Result<TransactionPage> {
        let Some(source) = destination.history() else {
            debug!(destination = %destination.label(), "History unavailable for destination");
            return Ok(TransactionPage::unsupported());
        };

        match timeout(self.timeout, self.fetch(source, cursor)).await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(LedgerError::Unsupported(what))) => {
                debug!(destination = %destination.label(), "Backend does not support {}", what);
                Ok(TransactionPage::unsupported())
            }
            Ok(Err(e)) => {
                warn!(destination = %destination.label(), "History query failed: {}", e);
                Err(history_error(e))
            }
            Err(_) => {
                warn!(destination = %destination.label(), timeout = ?self.timeout, "History query timed out");
                Err(ForwarderError::Timeout(self.timeout))
            }
        }
    }

    async fn fetch(
        &self,
        source: HistorySource<'_>,
        cursor: Option<&str>,
    ) -> std::result::Result<TransactionPage, LedgerError> {
        let mut transactions = Vec::new();

        let next_cursor = match source {
            HistorySource::Ledger(credential) => {
                let page = self.ledger.list_wallet_transactions(credential, cursor).await?;
                for tx in &page.items {
                    let cached = self.cached_memo(&tx.id).await;
                    transactions.extend(normalize::from_ledger(tx, cached));
                }
                page.next_cursor
            }
            HistorySource::Remote(control) => {
                let page = control.list_transactions(cursor).await?;
                for tx in &page.items {
                    let cached = self.cached_memo(&tx.payment_hash).await;
                    transactions.extend(normalize::from_remote(tx, cached));
                }
                page.next_cursor
            }
        };

        Ok(TransactionPage {
            transactions,
            next_cursor,
            availability: Availability::Available,
        })
    }

    async fn cached_memo(&self, payment_hash: &str) -> Option<String> {
        match &self.memos {
            Some(memos) => memos.lookup(payment_hash).await,
            None => None,
        }
    }
}

fn history_error(err: LedgerError) -> ForwarderError {
    match err {
        LedgerError::Unauthorized(reason) => ConfigurationError::Invalid(format!(
            "destination credentials rejected: {}",
            reason
        ))
        .into(),
        other => ForwarderError::TransientIo(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::{ApiKeyWallet, LightningAddressWallet};
    use ledger_core::{LedgerTransaction, TxDirection, TxState};
    use mock_ledger::{MemoryStore, MockLedger};
    use secrecy::SecretString;

    fn ledger_tx(id: &str, memo: Option<&str>, state: TxState) -> LedgerTransaction {
        LedgerTransaction {
            id: id.to_string(),
            direction: TxDirection::Incoming,
            amount_sats: 100,
            memo: memo.map(str::to_string),
            counterparty: None,
            created_at: 1_700_000_000,
            settled_at: (state == TxState::Settled).then_some(1_700_000_050),
            state,
        }
    }

    #[tokio::test]
    async fn test_forward_only_destination_is_unsupported() {
        let ledger = Arc::new(MockLedger::new());
        let aggregator = TransactionAggregator::new(ledger, Duration::from_secs(1));
        let destination = WalletDestination::LightningAddress(LightningAddressWallet {
            address: "shop@example.com".into(),
            wallet_id: "w".into(),
        });

        let page = aggregator.list(&destination, None).await.unwrap();
        assert!(page.is_unsupported());
        assert!(page.transactions.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_ledger_history_with_cached_memo() {
        let ledger = Arc::new(MockLedger::new());
        ledger.register_wallet("w1", "key");
        ledger.add_wallet_transactions(
            "w1",
            [
                ledger_tx("h1", Some("short"), TxState::Settled),
                ledger_tx("h2", None, TxState::Pending),
                ledger_tx("h3", None, TxState::Failed),
            ],
        );
        let store = Arc::new(MemoryStore::new());
        let memos = MemoCache::new(store);
        memos.remember("h1", "Table 4: two flat whites").await;

        let aggregator =
            TransactionAggregator::new(ledger, Duration::from_secs(1)).with_memo_cache(memos);
        let destination =
            WalletDestination::ApiKey(ApiKeyWallet::new(SecretString::from("key"), "w1"));

        let page = aggregator.list(&destination, None).await.unwrap();
        assert!(!page.is_unsupported());
        assert_eq!(page.transactions.len(), 2);
        assert_eq!(page.transactions[0].memo, "Table 4: two flat whites");
        assert_eq!(page.transactions[1].memo, "Received 100 sats");
        assert_eq!(page.transactions[1].status, normalize::TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_bad_credentials_are_configuration_errors() {
        let ledger = Arc::new(MockLedger::new());
        ledger.register_wallet("w1", "right");
        let aggregator = TransactionAggregator::new(ledger, Duration::from_secs(1));
        let destination =
            WalletDestination::ApiKey(ApiKeyWallet::new(SecretString::from("wrong"), "w1"));

        let err = aggregator.list(&destination, None).await.unwrap_err();
        assert!(matches!(err, ForwarderError::Configuration(_)));
    }
}
