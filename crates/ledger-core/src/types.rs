//! Wire-neutral types exchanged with the collaborators.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An invoice freshly issued by a ledger or remote wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedInvoice {
    /// BOLT11 payment request.
    pub payment_request: String,
    /// Hex payment hash, unique per issuing backend.
    pub payment_hash: String,
    /// Unix timestamp after which the invoice can no longer be paid, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// A settlement notification from the ledger's shared feed.
///
/// The feed is multi-tenant: it carries settlements for every invoice issued
/// against the shared account, not only the caller's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub payment_hash: String,
    /// Amount received, in whole base units.
    pub amount_minor: u64,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Current state of an invoice as reported by a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Settled { settled_at: i64, amount_minor: u64 },
    Expired,
}

impl InvoiceStatus {
    pub fn is_settled(&self) -> bool {
        matches!(self, InvoiceStatus::Settled { .. })
    }
}

/// Where an internal ledger transfer should land.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TransferTarget {
    /// A wallet on the same ledger, addressed by id.
    Wallet(String),
    /// A receiving identity the ledger resolves itself (e.g. a mailbox address).
    Address(String),
}

impl fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferTarget::Wallet(id) => write!(f, "wallet:{}", id),
            TransferTarget::Address(address) => write!(f, "address:{}", address),
        }
    }
}

/// Receipt for a completed transfer or payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Backend reference for the movement of funds.
    pub reference: String,
    /// Fee charged, in whole base units.
    #[serde(default)]
    pub fee_minor: u64,
}

/// Credentials for a single wallet on the custodial ledger.
#[derive(Debug, Clone, Copy)]
pub struct WalletCredential<'a> {
    pub api_key: &'a str,
    pub wallet_id: &'a str,
}

/// Direction of a transaction relative to the wallet that reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    Incoming,
    Outgoing,
}

/// Backend-native transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Pending,
    Settled,
    Failed,
    Expired,
}

/// A transaction as the custodial ledger reports it for one wallet.
///
/// Amounts are already in whole base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Payment hash of the underlying invoice or payment.
    pub id: String,
    pub direction: TxDirection,
    pub amount_sats: u64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub settled_at: Option<i64>,
    pub state: TxState,
}

/// A transaction as a remote-control wallet reports it.
///
/// Amounts are in milli-units. Remote wallets frequently return only a hash
/// of the original description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    pub payment_hash: String,
    #[serde(default)]
    pub preimage: Option<String>,
    pub direction: TxDirection,
    pub amount_msat: u64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub description_hash: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub settled_at: Option<i64>,
    #[serde(default)]
    pub state: Option<TxState>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque cursor for the next page; `None` on the last page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// A method a remote-control wallet may expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteMethod {
    PayInvoice,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    GetBalance,
    Notifications,
}

impl RemoteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteMethod::PayInvoice => "pay_invoice",
            RemoteMethod::MakeInvoice => "make_invoice",
            RemoteMethod::LookupInvoice => "lookup_invoice",
            RemoteMethod::ListTransactions => "list_transactions",
            RemoteMethod::GetBalance => "get_balance",
            RemoteMethod::Notifications => "notifications",
        }
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pay_invoice" => Ok(RemoteMethod::PayInvoice),
            "make_invoice" => Ok(RemoteMethod::MakeInvoice),
            "lookup_invoice" => Ok(RemoteMethod::LookupInvoice),
            "list_transactions" => Ok(RemoteMethod::ListTransactions),
            "get_balance" => Ok(RemoteMethod::GetBalance),
            "notifications" => Ok(RemoteMethod::Notifications),
            other => Err(format!("unknown remote method: {}", other)),
        }
    }
}

/// The set of methods a remote wallet advertised when we connected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCapabilities(BTreeSet<RemoteMethod>);

impl RemoteCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the method names a wallet advertises, skipping ones we don't know.
    pub fn from_method_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        names
            .into_iter()
            .filter_map(|name| name.parse::<RemoteMethod>().ok())
            .collect()
    }

    pub fn contains(&self, method: RemoteMethod) -> bool {
        self.0.contains(&method)
    }

    pub fn insert(&mut self, method: RemoteMethod) {
        self.0.insert(method);
    }

    pub fn iter(&self) -> impl Iterator<Item = RemoteMethod> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<RemoteMethod> for RemoteCapabilities {
    fn from_iter<I: IntoIterator<Item = RemoteMethod>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
