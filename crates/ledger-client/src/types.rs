//! Wire types for the ledger REST API.

use ledger_core::{
    CreatedInvoice, InvoiceStatus, LedgerTransaction, Page, Settlement, TransferReceipt,
    TransferTarget, TxDirection, TxState,
};
use serde::{Deserialize, Serialize};

/// Body for issuing an invoice.
#[derive(Debug, Clone, Serialize)]
pub struct CreateInvoiceRequest<'a> {
    /// Amount in whole base units.
    pub amount: u64,
    pub memo: &'a str,
    /// Expiry in seconds; the ledger default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

/// An issued invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceResponse {
    pub payment_request: String,
    pub payment_hash: String,
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl From<InvoiceResponse> for CreatedInvoice {
    fn from(resp: InvoiceResponse) -> Self {
        CreatedInvoice {
            payment_request: resp.payment_request,
            payment_hash: resp.payment_hash,
            expires_at: resp.expires_at,
        }
    }
}

/// Result of looking up one invoice.
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceLookupResponse {
    pub payment_hash: String,
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub expired: bool,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub settled_at: Option<i64>,
}

impl From<InvoiceLookupResponse> for InvoiceStatus {
    fn from(resp: InvoiceLookupResponse) -> Self {
        if resp.paid {
            InvoiceStatus::Settled {
                settled_at: resp.settled_at.unwrap_or_default(),
                amount_minor: resp.amount,
            }
        } else if resp.expired {
            InvoiceStatus::Expired
        } else {
            InvoiceStatus::Pending
        }
    }
}

/// Body for an internal transfer. Exactly one target field is set.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_wallet: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_address: Option<&'a str>,
    pub amount: u64,
    pub memo: &'a str,
    /// The ledger commits at most one transfer per key.
    pub idempotency_key: &'a str,
}

impl<'a> TransferRequest<'a> {
    pub fn new(
        target: &'a TransferTarget,
        amount: u64,
        memo: &'a str,
        idempotency_key: &'a str,
    ) -> Self {
        let (to_wallet, to_address) = match target {
            TransferTarget::Wallet(id) => (Some(id.as_str()), None),
            TransferTarget::Address(address) => (None, Some(address.as_str())),
        };
        Self {
            to_wallet,
            to_address,
            amount,
            memo,
            idempotency_key,
        }
    }
}

/// Body for paying a BOLT11 invoice.
#[derive(Debug, Clone, Serialize)]
pub struct PayRequest<'a> {
    pub bolt11: &'a str,
}

/// Receipt for a transfer or payment.
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptResponse {
    #[serde(alias = "id")]
    pub reference: String,
    #[serde(default)]
    pub fee: u64,
}

impl From<ReceiptResponse> for TransferReceipt {
    fn from(resp: ReceiptResponse) -> Self {
        TransferReceipt {
            reference: resp.reference,
            fee_minor: resp.fee,
        }
    }
}

/// One transaction as the ledger serializes it.
///
/// Outgoing transactions carry a negative amount.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTransaction {
    pub payment_hash: String,
    pub amount: i64,
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(default)]
    pub counterparty: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub settled_at: Option<i64>,
    pub status: String,
}

impl From<WireTransaction> for LedgerTransaction {
    fn from(tx: WireTransaction) -> Self {
        let direction = if tx.amount < 0 {
            TxDirection::Outgoing
        } else {
            TxDirection::Incoming
        };
        let state = match tx.status.as_str() {
            "settled" | "success" | "complete" => TxState::Settled,
            "failed" => TxState::Failed,
            "expired" => TxState::Expired,
            _ => TxState::Pending,
        };
        LedgerTransaction {
            id: tx.payment_hash,
            direction,
            amount_sats: tx.amount.unsigned_abs(),
            memo: tx.memo,
            counterparty: tx.counterparty,
            created_at: tx.created_at,
            settled_at: tx.settled_at,
            state,
        }
    }
}

/// One page of wallet transactions.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<WireTransaction>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

impl From<TransactionsResponse> for Page<LedgerTransaction> {
    fn from(resp: TransactionsResponse) -> Self {
        Page {
            items: resp.transactions.into_iter().map(Into::into).collect(),
            next_cursor: resp.next_cursor,
        }
    }
}

/// Payload of a `settlement` SSE event.
#[derive(Debug, Clone, Deserialize)]
pub struct SettlementEvent {
    pub payment_hash: String,
    pub amount: u64,
    #[serde(default)]
    pub memo: Option<String>,
}

impl From<SettlementEvent> for Settlement {
    fn from(event: SettlementEvent) -> Self {
        Settlement {
            payment_hash: event.payment_hash,
            amount_minor: event.amount,
            memo: event.memo,
        }
    }
}

/// Error body returned with non-success statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    #[serde(alias = "detail", alias = "error")]
    pub message: String,
}
