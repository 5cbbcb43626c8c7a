//! Custodial ledger HTTP client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ledger_core::{
    CreatedInvoice, CustodialLedger, InvoiceStatus, LedgerError, LedgerTransaction, Page,
    SettlementStream, TransferReceipt, TransferTarget, WalletCredential,
};
use reqwest::{Client, Response};
use reqwest_eventsource::RequestBuilderExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::error::ClientError;
use crate::sse::SettlementFeed;
use crate::types::{
    CreateInvoiceRequest, ErrorBody, InvoiceLookupResponse, InvoiceResponse, PayRequest,
    ReceiptResponse, TransactionsResponse, TransferRequest,
};

/// Header carrying the account or wallet API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Header the ledger deduplicates mutating requests on.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Client for the custodial ledger REST API.
#[derive(Clone)]
pub struct LedgerClient {
    http: Client,
    config: LedgerConfig,
    connected: Arc<AtomicBool>,
}

impl LedgerClient {
    /// Build a client without contacting the ledger.
    pub fn new(config: LedgerConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            config,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Connect to the ledger, verifying it with a health check.
    pub async fn connect(config: LedgerConfig) -> Result<Self, ClientError> {
        let client = Self::new(config)?;

        if client.health_check().await? {
            info!("Connected to custodial ledger at {}", client.config.base_url);
        } else {
            return Err(ClientError::HealthCheckFailed);
        }

        Ok(client)
    }

    /// Check if the last health check succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get the client configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Perform a health check against the ledger.
    pub async fn health_check(&self) -> Result<bool, ClientError> {
        let url = self.config.health_url();
        debug!("Health check: {}", url);

        match self.http.get(&url).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                self.connected.store(ok, Ordering::SeqCst);
                Ok(ok)
            }
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(ClientError::Http(e))
            }
        }
    }

    async fn post_json<B, T>(&self, url: &str, api_key: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .json(body)
            .send()
            .await?;
        read_response(resp).await
    }

    /// POST that the ledger deduplicates on `idempotency_key`.
    async fn post_idempotent<B, T>(
        &self,
        url: &str,
        api_key: &str,
        idempotency_key: &str,
        body: &B,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(idempotency_key, "POST {}", url);
        let resp = self
            .http
            .post(url)
            .header(API_KEY_HEADER, api_key)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;
        read_response(resp).await
    }

    async fn get_json<T>(&self, url: &str, api_key: &str) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .header(API_KEY_HEADER, api_key)
            .send()
            .await?;
        read_response(resp).await
    }
}

/// Turn a response into `T`, or into a [`ClientError::Status`] carrying the
/// ledger's error message.
async fn read_response<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        warn!(status = status.as_u16(), "Ledger request failed: {}", message);
        return Err(ClientError::Status {
            status: status.as_u16(),
            message,
        });
    }

    Ok(resp.json::<T>().await?)
}

#[async_trait]
impl CustodialLedger for LedgerClient {
    async fn create_invoice(
        &self,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        let body = CreateInvoiceRequest {
            amount: amount_minor,
            memo,
            expiry: None,
        };
        let resp: InvoiceResponse = self
            .post_json(&self.config.invoices_url(), self.config.api_key(), &body)
            .await?;
        Ok(resp.into())
    }

    async fn subscribe_settlements(&self) -> Result<SettlementStream, LedgerError> {
        let url = self.config.settlements_url();
        info!("Opening settlement feed at {}", url);

        // Separate client without a timeout; the feed is long-lived
        let sse_client = Client::builder().build().map_err(ClientError::Http)?;
        let event_source = sse_client
            .get(&url)
            .header(API_KEY_HEADER, self.config.api_key())
            .eventsource()
            .map_err(|e| ClientError::Sse(e.to_string()))?;

        let feed = SettlementFeed::open(event_source).await?;
        Ok(Box::pin(feed))
    }

    async fn transfer_internal(
        &self,
        to: &TransferTarget,
        amount_minor: u64,
        memo: &str,
        idempotency_key: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        let body = TransferRequest::new(to, amount_minor, memo, idempotency_key);
        let result: Result<ReceiptResponse, ClientError> = self
            .post_idempotent(
                &self.config.transfers_url(),
                self.config.api_key(),
                idempotency_key,
                &body,
            )
            .await;

        match result {
            Ok(receipt) => Ok(receipt.into()),
            Err(ClientError::Status { status: 404, .. }) => {
                Err(ClientError::UnknownTarget(to.to_string()).into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn pay_invoice(&self, bolt11: &str) -> Result<TransferReceipt, LedgerError> {
        let body = PayRequest { bolt11 };
        let receipt: ReceiptResponse = self
            .post_json(&self.config.payments_url(), self.config.api_key(), &body)
            .await?;
        Ok(receipt.into())
    }

    fn name(&self) -> &str {
        "ledger-client"
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<InvoiceStatus, LedgerError> {
        let resp: InvoiceLookupResponse = self
            .get_json(&self.config.invoice_url(payment_hash), self.config.api_key())
            .await?;
        Ok(resp.into())
    }

    async fn create_wallet_invoice(
        &self,
        credential: WalletCredential<'_>,
        amount_minor: u64,
        memo: &str,
    ) -> Result<CreatedInvoice, LedgerError> {
        let body = CreateInvoiceRequest {
            amount: amount_minor,
            memo,
            expiry: None,
        };
        let resp: InvoiceResponse = self
            .post_json(
                &self.config.wallet_invoices_url(credential.wallet_id),
                credential.api_key,
                &body,
            )
            .await?;
        Ok(resp.into())
    }

    async fn list_wallet_transactions(
        &self,
        credential: WalletCredential<'_>,
        cursor: Option<&str>,
    ) -> Result<Page<LedgerTransaction>, LedgerError> {
        let url = self
            .config
            .wallet_transactions_url(credential.wallet_id, cursor);
        let resp: TransactionsResponse = self.get_json(&url, credential.api_key).await?;
        Ok(resp.into())
    }
}
