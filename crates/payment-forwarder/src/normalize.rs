//! One mapping per backend into [`CanonicalTransaction`].
//!
//! Each mapper targets the canonical shape on its own; adding a backend adds
//! a function here and never touches aggregation.

use ledger_core::{LedgerTransaction, RemoteTransaction, TxDirection, TxState};
use serde::{Deserialize, Serialize};

/// Currency of every canonical amount.
pub const CURRENCY: &str = "SAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Receive,
    Send,
}

impl From<TxDirection> for Direction {
    fn from(direction: TxDirection) -> Self {
        match direction {
            TxDirection::Incoming => Direction::Receive,
            TxDirection::Outgoing => Direction::Send,
        }
    }
}

/// Only two statuses exist; failures are left out of listings entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Success,
    Pending,
}

/// Which backend a transaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionSource {
    Ledger,
    RemoteControl,
}

/// A transaction in the one reporting model every backend maps into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTransaction {
    /// Backend-native payment hash.
    pub id: String,
    pub direction: Direction,
    pub status: TxStatus,
    /// Whole base units.
    pub amount_sats: u64,
    pub currency: String,
    pub counterparty_label: String,
    pub memo: String,
    pub created_at_epoch: i64,
    pub source: TransactionSource,
}

/// The fallback memo when neither the cache nor the backend has one.
pub fn fallback_memo(direction: Direction, amount_sats: u64) -> String {
    match direction {
        Direction::Receive => format!("Received {} sats", amount_sats),
        Direction::Send => format!("Sent {} sats", amount_sats),
    }
}

/// Cached memo first, then the backend's own text, then the fallback.
pub fn resolve_memo(
    cached: Option<String>,
    native: Option<&str>,
    direction: Direction,
    amount_sats: u64,
) -> String {
    cached
        .filter(|memo| !memo.is_empty())
        .or_else(|| {
            native
                .map(str::trim)
                .filter(|memo| !memo.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| fallback_memo(direction, amount_sats))
}

fn status(settled_at: Option<i64>) -> TxStatus {
    if settled_at.is_some() {
        TxStatus::Success
    } else {
        TxStatus::Pending
    }
}

fn is_dropped(state: Option<TxState>) -> bool {
    matches!(state, Some(TxState::Failed) | Some(TxState::Expired))
}

/// Map a custodial-ledger wallet transaction. Amounts are already whole.
pub fn from_ledger(tx: &LedgerTransaction, cached_memo: Option<String>) -> Option<CanonicalTransaction> {
    if is_dropped(Some(tx.state)) {
        return None;
    }

    let direction = Direction::from(tx.direction);
    Some(CanonicalTransaction {
        id: tx.id.clone(),
        direction,
        status: status(tx.settled_at),
        amount_sats: tx.amount_sats,
        currency: CURRENCY.to_string(),
        counterparty_label: tx
            .counterparty
            .clone()
            .unwrap_or_else(|| "Lightning".to_string()),
        memo: resolve_memo(cached_memo, tx.memo.as_deref(), direction, tx.amount_sats),
        created_at_epoch: tx.created_at,
        source: TransactionSource::Ledger,
    })
}

/// Map a remote-control wallet transaction, converting milli-units once.
pub fn from_remote(tx: &RemoteTransaction, cached_memo: Option<String>) -> Option<CanonicalTransaction> {
    if is_dropped(tx.state) {
        return None;
    }

    let direction = Direction::from(tx.direction);
    let amount_sats = tx.amount_msat / 1000;
    Some(CanonicalTransaction {
        id: tx.payment_hash.clone(),
        direction,
        status: status(tx.settled_at),
        amount_sats,
        currency: CURRENCY.to_string(),
        counterparty_label: "Remote wallet".to_string(),
        memo: resolve_memo(cached_memo, tx.description.as_deref(), direction, amount_sats),
        created_at_epoch: tx.created_at,
        source: TransactionSource::RemoteControl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(settled_at: Option<i64>, state: Option<TxState>) -> RemoteTransaction {
        RemoteTransaction {
            payment_hash: "hash".into(),
            preimage: None,
            direction: TxDirection::Incoming,
            amount_msat: 21_999,
            description: Some("Invoice #4".into()),
            description_hash: None,
            created_at: 1_700_000_000,
            settled_at,
            state,
        }
    }

    #[test]
    fn test_remote_amount_converted_to_whole_units() {
        let tx = from_remote(&remote(Some(1_700_000_100), None), None).unwrap();
        assert_eq!(tx.amount_sats, 21);
        assert_eq!(tx.status, TxStatus::Success);
        assert_eq!(tx.source, TransactionSource::RemoteControl);
        assert_eq!(tx.memo, "Invoice #4");
    }

    #[test]
    fn test_unsettled_is_pending_and_failures_dropped() {
        assert_eq!(
            from_remote(&remote(None, Some(TxState::Pending)), None)
                .unwrap()
                .status,
            TxStatus::Pending
        );
        assert!(from_remote(&remote(None, Some(TxState::Failed)), None).is_none());
        assert!(from_remote(&remote(None, Some(TxState::Expired)), None).is_none());
    }

    #[test]
    fn test_memo_resolution_order() {
        assert_eq!(
            resolve_memo(Some("cached".into()), Some("native"), Direction::Receive, 5),
            "cached"
        );
        assert_eq!(
            resolve_memo(None, Some("native"), Direction::Receive, 5),
            "native"
        );
        assert_eq!(
            resolve_memo(None, Some("  "), Direction::Send, 5),
            "Sent 5 sats"
        );
        assert_eq!(resolve_memo(None, None, Direction::Receive, 7), "Received 7 sats");
    }

    #[test]
    fn test_ledger_outgoing_maps_to_send() {
        let tx = LedgerTransaction {
            id: "abc".into(),
            direction: TxDirection::Outgoing,
            amount_sats: 300,
            memo: None,
            counterparty: Some("bob@example.com".into()),
            created_at: 1,
            settled_at: None,
            state: TxState::Pending,
        };
        let canonical = from_ledger(&tx, None).unwrap();
        assert_eq!(canonical.direction, Direction::Send);
        assert_eq!(canonical.counterparty_label, "bob@example.com");
        assert_eq!(
            serde_json::to_value(canonical.direction).unwrap(),
            serde_json::json!("SEND")
        );
    }
}
