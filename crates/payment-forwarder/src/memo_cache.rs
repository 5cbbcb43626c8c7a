//! Memos of invoices this system issued, keyed by payment hash.
//!
//! Remote-control wallets hand back only a hash of the description, so the
//! original text is kept here and preferred over whatever a backend returns.
//! Store failures never fail a payment; they are logged and treated as a miss.

use std::sync::Arc;

use ledger_core::KeyValueStore;
use tracing::warn;

#[derive(Clone)]
pub struct MemoCache {
    store: Arc<dyn KeyValueStore>,
}

impl MemoCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Remember `memo` for `payment_hash`. Empty memos are not stored.
    pub async fn remember(&self, payment_hash: &str, memo: &str) {
        if memo.is_empty() {
            return;
        }
        if let Err(e) = self.store.put(payment_hash, memo).await {
            warn!(payment_hash, "Failed to cache memo: {}", e);
        }
    }

    pub async fn lookup(&self, payment_hash: &str) -> Option<String> {
        match self.store.get(payment_hash).await {
            Ok(memo) => memo,
            Err(e) => {
                warn!(payment_hash, "Failed to read cached memo: {}", e);
                None
            }
        }
    }
}
