//! Configuration types for ledger-client.

use std::env;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ClientError;

/// Default timeout for regular (non-streaming) requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for connecting to the custodial ledger.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Base URL of the ledger API (e.g., "https://ledger.example.com").
    pub base_url: String,
    /// API key of the shared custodial account.
    api_key: SecretString,
    /// Timeout for regular requests. The settlement stream never times out.
    pub http_timeout: Duration,
}

impl LedgerConfig {
    /// Create a new configuration with the given base URL and shared-account key.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Required:
    /// - `LEDGER_URL` - Base URL of the ledger API
    /// - `LEDGER_API_KEY` - API key of the shared custodial account
    ///
    /// Optional (with defaults):
    /// - `LEDGER_HTTP_TIMEOUT_SECS` - Default: 30
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = env::var("LEDGER_URL")
            .map_err(|_| ClientError::MissingEnvVar("LEDGER_URL".to_string()))?;
        let api_key = env::var("LEDGER_API_KEY")
            .map_err(|_| ClientError::MissingEnvVar("LEDGER_API_KEY".to_string()))?;

        let http_timeout = match env::var("LEDGER_HTTP_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(raw.parse::<u64>().map_err(|e| {
                ClientError::Config(format!("Invalid LEDGER_HTTP_TIMEOUT_SECS: {}", e))
            })?),
            Err(_) => DEFAULT_HTTP_TIMEOUT,
        };

        Ok(Self::new(base_url, api_key).with_http_timeout(http_timeout))
    }

    /// Builder method to set the request timeout.
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Get the shared-account API key (exposes the secret).
    pub(crate) fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get the health check endpoint URL.
    pub fn health_url(&self) -> String {
        format!("{}/api/v1/health", self.base_url)
    }

    /// Get the shared-account invoices endpoint URL.
    pub fn invoices_url(&self) -> String {
        format!("{}/api/v1/invoices", self.base_url)
    }

    /// Get the lookup URL for one shared-account invoice.
    pub fn invoice_url(&self, payment_hash: &str) -> String {
        format!(
            "{}/api/v1/invoices/{}",
            self.base_url,
            urlencoding::encode(payment_hash)
        )
    }

    /// Get the internal transfers endpoint URL.
    pub fn transfers_url(&self) -> String {
        format!("{}/api/v1/transfers", self.base_url)
    }

    /// Get the outgoing payments endpoint URL.
    pub fn payments_url(&self) -> String {
        format!("{}/api/v1/payments", self.base_url)
    }

    /// Get the settlement SSE endpoint URL.
    pub fn settlements_url(&self) -> String {
        format!("{}/api/v1/settlements/stream", self.base_url)
    }

    /// Get the invoices endpoint URL for a merchant wallet.
    pub fn wallet_invoices_url(&self, wallet_id: &str) -> String {
        format!(
            "{}/api/v1/wallets/{}/invoices",
            self.base_url,
            urlencoding::encode(wallet_id)
        )
    }

    /// Get the transactions endpoint URL for a merchant wallet (with cursor if set).
    pub fn wallet_transactions_url(&self, wallet_id: &str, cursor: Option<&str>) -> String {
        let base = format!(
            "{}/api/v1/wallets/{}/transactions",
            self.base_url,
            urlencoding::encode(wallet_id)
        );
        match cursor {
            Some(cursor) => format!("{}?cursor={}", base, urlencoding::encode(cursor)),
            None => base,
        }
    }
}
