//! Configuration for the forwarder and the merchant's destination.

use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigurationError;

/// Configuration for automatic reconnection of the settlement feed.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive retries (None = infinite).
    pub max_retries: Option<u32>,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier for each retry.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32);
        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Check if we should retry after the given number of attempts.
    pub fn should_retry(&self, attempts: u32) -> bool {
        self.max_retries.map_or(true, |max| attempts < max)
    }
}

/// Retry bound for transient forwarding errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay_ms =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay_ms as u64).min(self.max_delay)
    }
}

/// Configuration for [`PaymentForwarder`](crate::PaymentForwarder).
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// Backoff for the settlement feed.
    pub reconnect: ReconnectConfig,
    /// Interval between invoice lookups when the ledger has no push feed.
    pub poll_interval: Duration,
    /// Retry bound for forwarding.
    pub forward_retry: RetryPolicy,
    /// Timeout for a single history query.
    pub history_timeout: Duration,
    /// Invoice lifetime used when the ledger does not report one.
    pub invoice_expiry: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            poll_interval: Duration::from_secs(5),
            forward_retry: RetryPolicy::default(),
            history_timeout: Duration::from_secs(15),
            invoice_expiry: Duration::from_secs(3600),
            event_capacity: 16,
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables.
    ///
    /// All variables are optional:
    /// - `FORWARDER_POLL_INTERVAL_SECS` - Default: 5
    /// - `FORWARDER_RECONNECT_MAX_RETRIES` - Default: unlimited
    /// - `FORWARDER_RECONNECT_MAX_DELAY_SECS` - Default: 30
    /// - `FORWARDER_FORWARD_MAX_ATTEMPTS` - Default: 3
    /// - `FORWARDER_HISTORY_TIMEOUT_SECS` - Default: 15
    /// - `FORWARDER_INVOICE_EXPIRY_SECS` - Default: 3600
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let mut config = Self::default();

        if let Some(secs) = parse_env::<u64>("FORWARDER_POLL_INTERVAL_SECS")? {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(retries) = parse_env::<u32>("FORWARDER_RECONNECT_MAX_RETRIES")? {
            config.reconnect.max_retries = Some(retries);
        }
        if let Some(secs) = parse_env::<u64>("FORWARDER_RECONNECT_MAX_DELAY_SECS")? {
            config.reconnect.max_delay = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_env::<u32>("FORWARDER_FORWARD_MAX_ATTEMPTS")? {
            config.forward_retry.max_attempts = attempts.max(1);
        }
        if let Some(secs) = parse_env::<u64>("FORWARDER_HISTORY_TIMEOUT_SECS")? {
            config.history_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>("FORWARDER_INVOICE_EXPIRY_SECS")? {
            config.invoice_expiry = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Builder method to set the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Builder method to set the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to set the forwarding retry policy.
    pub fn with_forward_retry(mut self, policy: RetryPolicy) -> Self {
        self.forward_retry = policy;
        self
    }

    /// Builder method to set the history timeout.
    pub fn with_history_timeout(mut self, timeout: Duration) -> Self {
        self.history_timeout = timeout;
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigurationError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigurationError::Invalid(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}

/// The merchant's configured destination, one of four credential shapes.
///
/// Shapes are validated by account management before they reach this crate.
#[derive(Debug, Clone)]
pub enum MerchantConfig {
    /// A wallet on the custodial ledger opened with its own API key.
    ApiKey {
        api_key: SecretString,
        wallet_id: String,
    },

    /// A read-only Lightning address backed by a wallet on the ledger.
    LightningAddress { address: String, wallet_id: String },

    /// A wallet reached through a wallet-control connection URI.
    RemoteControl { connection_uri: SecretString },

    /// An ecash mailbox receiving through its address.
    EcashMailbox { address: String },
}

impl MerchantConfig {
    /// Create a merchant configuration from environment variables.
    ///
    /// Returns `Ok(None)` when `FORWARD_DESTINATION` is unset.
    ///
    /// Expects `FORWARD_DESTINATION` to be one of:
    /// - `api_key` - with `FORWARD_API_KEY` and `FORWARD_WALLET_ID`
    /// - `lightning_address` - with `FORWARD_LIGHTNING_ADDRESS` and `FORWARD_WALLET_ID`
    /// - `remote_control` - with `FORWARD_REMOTE_URI`
    /// - `ecash_mailbox` - with `FORWARD_MAILBOX_ADDRESS`
    pub fn from_env() -> Result<Option<Self>, ConfigurationError> {
        let kind = match env::var("FORWARD_DESTINATION") {
            Ok(kind) => kind,
            Err(_) => return Ok(None),
        };

        let config = match kind.as_str() {
            "api_key" => MerchantConfig::ApiKey {
                api_key: SecretString::from(required("FORWARD_API_KEY")?),
                wallet_id: required("FORWARD_WALLET_ID")?,
            },
            "lightning_address" => MerchantConfig::LightningAddress {
                address: required("FORWARD_LIGHTNING_ADDRESS")?,
                wallet_id: required("FORWARD_WALLET_ID")?,
            },
            "remote_control" => MerchantConfig::RemoteControl {
                connection_uri: SecretString::from(required("FORWARD_REMOTE_URI")?),
            },
            "ecash_mailbox" => MerchantConfig::EcashMailbox {
                address: required("FORWARD_MAILBOX_ADDRESS")?,
            },
            other => {
                return Err(ConfigurationError::Invalid(format!(
                    "Unknown FORWARD_DESTINATION: {}",
                    other
                )))
            }
        };

        Ok(Some(config))
    }
}

fn required(name: &str) -> Result<String, ConfigurationError> {
    env::var(name).map_err(|_| ConfigurationError::Invalid(format!("Missing {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_delays_are_capped() {
        let config = ReconnectConfig {
            max_retries: None,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry() {
        let unlimited = ReconnectConfig::default();
        assert!(unlimited.should_retry(1_000));

        let limited = ReconnectConfig {
            max_retries: Some(3),
            ..Default::default()
        };
        assert!(limited.should_retry(2));
        assert!(!limited.should_retry(3));
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(10), Duration::from_secs(5));
    }

    #[test]
    fn test_forwarder_config_defaults() {
        let config = ForwarderConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.forward_retry.max_attempts, 3);
        assert_eq!(config.invoice_expiry, Duration::from_secs(3600));
    }
}
