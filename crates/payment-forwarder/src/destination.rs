//! Where forwarded funds end up.
//!
//! A [`WalletDestination`] is resolved once from the merchant's configuration
//! and carries the capabilities its variant supports. Operations are reached
//! through typed accessors ([`WalletDestination::invoicer`],
//! [`WalletDestination::history`], [`WalletDestination::forward_route`])
//! rather than by comparing wallet type names at call sites.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use ledger_core::{
    RemoteCapabilities, RemoteMethod, RemoteWalletConnector, RemoteWalletControl,
    TransferTarget, WalletCredential,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::MerchantConfig;
use crate::error::{ConfigurationError, ForwarderError, Result};

/// An operation a destination may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    CreateInvoice,
    Forward,
    ListTransactions,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::CreateInvoice => "create_invoice",
            Capability::Forward => "forward",
            Capability::ListTransactions => "list_transactions",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The capabilities attached to a resolved destination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which of the four destination shapes is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationKind {
    ApiKey,
    LightningAddress,
    RemoteControl,
    EcashMailbox,
}

impl DestinationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationKind::ApiKey => "api_key",
            DestinationKind::LightningAddress => "lightning_address",
            DestinationKind::RemoteControl => "remote_control",
            DestinationKind::EcashMailbox => "ecash_mailbox",
        }
    }
}

impl fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A wallet on the custodial ledger, opened with its own API key.
#[derive(Debug, Clone)]
pub struct ApiKeyWallet {
    credential: SecretString,
    pub wallet_id: String,
}

impl ApiKeyWallet {
    pub fn new(credential: SecretString, wallet_id: impl Into<String>) -> Self {
        Self {
            credential,
            wallet_id: wallet_id.into(),
        }
    }

    pub(crate) fn credential(&self) -> WalletCredential<'_> {
        WalletCredential {
            api_key: self.credential.expose_secret(),
            wallet_id: &self.wallet_id,
        }
    }
}

/// A Lightning address backed by a ledger wallet. Forward-only.
#[derive(Debug, Clone)]
pub struct LightningAddressWallet {
    pub address: String,
    pub wallet_id: String,
}

/// A wallet reached over a wallet-control connection.
#[derive(Clone)]
pub struct RemoteControlWallet {
    connection_uri: SecretString,
    control: Arc<dyn RemoteWalletControl>,
    capabilities: RemoteCapabilities,
}

impl RemoteControlWallet {
    pub fn new(
        connection_uri: SecretString,
        control: Arc<dyn RemoteWalletControl>,
        capabilities: RemoteCapabilities,
    ) -> Self {
        Self {
            connection_uri,
            control,
            capabilities,
        }
    }

    /// Methods the wallet advertised when it was connected.
    pub fn remote_capabilities(&self) -> &RemoteCapabilities {
        &self.capabilities
    }

    pub fn control(&self) -> &Arc<dyn RemoteWalletControl> {
        &self.control
    }
}

impl fmt::Debug for RemoteControlWallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteControlWallet")
            .field("connection_uri", &self.connection_uri)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// An ecash mailbox. Forward-only; conversion happens on the mailbox's side.
#[derive(Debug, Clone)]
pub struct EcashMailboxWallet {
    pub address: String,
}

/// The merchant's resolved destination.
#[derive(Debug, Clone)]
pub enum WalletDestination {
    ApiKey(ApiKeyWallet),
    LightningAddress(LightningAddressWallet),
    RemoteControl(RemoteControlWallet),
    EcashMailbox(EcashMailboxWallet),
}

/// How to ask a destination for an invoice payable to itself.
pub enum DestinationInvoicer<'a> {
    /// Issue on the destination's own ledger wallet.
    Ledger(WalletCredential<'a>),
    /// Ask the remote wallet.
    Remote(&'a Arc<dyn RemoteWalletControl>),
}

/// Where a destination's transaction history comes from.
pub enum HistorySource<'a> {
    Ledger(WalletCredential<'a>),
    Remote(&'a Arc<dyn RemoteWalletControl>),
}

/// How forwarded funds reach a destination.
#[derive(Clone)]
pub enum ForwardRoute {
    /// An internal transfer on the custodial ledger.
    Internal(TransferTarget),
    /// An invoice requested from the remote wallet, paid from the custodial account.
    RemoteInvoice(Arc<dyn RemoteWalletControl>),
}

impl fmt::Debug for ForwardRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardRoute::Internal(target) => f.debug_tuple("Internal").field(target).finish(),
            ForwardRoute::RemoteInvoice(_) => f.write_str("RemoteInvoice"),
        }
    }
}

impl WalletDestination {
    pub fn kind(&self) -> DestinationKind {
        match self {
            WalletDestination::ApiKey(_) => DestinationKind::ApiKey,
            WalletDestination::LightningAddress(_) => DestinationKind::LightningAddress,
            WalletDestination::RemoteControl(_) => DestinationKind::RemoteControl,
            WalletDestination::EcashMailbox(_) => DestinationKind::EcashMailbox,
        }
    }

    pub fn capabilities(&self) -> CapabilitySet {
        match self {
            WalletDestination::ApiKey(_) => [
                Capability::CreateInvoice,
                Capability::Forward,
                Capability::ListTransactions,
            ]
            .into_iter()
            .collect(),
            WalletDestination::LightningAddress(_) | WalletDestination::EcashMailbox(_) => {
                [Capability::Forward].into_iter().collect()
            }
            WalletDestination::RemoteControl(wallet) => {
                let mut set = BTreeSet::from([Capability::Forward]);
                if wallet.capabilities.contains(RemoteMethod::MakeInvoice) {
                    set.insert(Capability::CreateInvoice);
                }
                if wallet.capabilities.contains(RemoteMethod::ListTransactions) {
                    set.insert(Capability::ListTransactions);
                }
                CapabilitySet(set)
            }
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// A log-safe description. Never contains credentials.
    pub fn label(&self) -> String {
        match self {
            WalletDestination::ApiKey(wallet) => format!("api_key:{}", wallet.wallet_id),
            WalletDestination::LightningAddress(wallet) => {
                format!("lightning_address:{}", wallet.address)
            }
            WalletDestination::RemoteControl(_) => "remote_control".to_string(),
            WalletDestination::EcashMailbox(wallet) => format!("ecash_mailbox:{}", wallet.address),
        }
    }

    /// Access to the destination's own invoice issuance.
    ///
    /// Lightning-address and ecash-mailbox destinations cannot issue
    /// invoices and are rejected with `UnsupportedOperation`.
    pub fn invoicer(&self) -> Result<DestinationInvoicer<'_>> {
        match self {
            WalletDestination::ApiKey(wallet) => Ok(DestinationInvoicer::Ledger(wallet.credential())),
            WalletDestination::RemoteControl(wallet)
                if wallet.capabilities.contains(RemoteMethod::MakeInvoice) =>
            {
                Ok(DestinationInvoicer::Remote(&wallet.control))
            }
            _ => Err(ForwarderError::UnsupportedOperation {
                operation: Capability::CreateInvoice,
                destination: self.kind(),
            }),
        }
    }

    /// Where to read history from, if the destination has any.
    pub fn history(&self) -> Option<HistorySource<'_>> {
        match self {
            WalletDestination::ApiKey(wallet) => Some(HistorySource::Ledger(wallet.credential())),
            WalletDestination::RemoteControl(wallet)
                if wallet.capabilities.contains(RemoteMethod::ListTransactions) =>
            {
                Some(HistorySource::Remote(&wallet.control))
            }
            _ => None,
        }
    }

    /// How forwarded funds reach this destination.
    pub fn forward_route(&self) -> ForwardRoute {
        match self {
            WalletDestination::ApiKey(wallet) => {
                ForwardRoute::Internal(TransferTarget::Wallet(wallet.wallet_id.clone()))
            }
            WalletDestination::LightningAddress(wallet) => {
                ForwardRoute::Internal(TransferTarget::Wallet(wallet.wallet_id.clone()))
            }
            WalletDestination::EcashMailbox(wallet) => {
                ForwardRoute::Internal(TransferTarget::Address(wallet.address.clone()))
            }
            WalletDestination::RemoteControl(wallet) => {
                ForwardRoute::RemoteInvoice(Arc::clone(&wallet.control))
            }
        }
    }
}

/// Resolves the merchant's configuration into the active destination.
pub struct DestinationResolver {
    config: Option<MerchantConfig>,
    connector: Option<Arc<dyn RemoteWalletConnector>>,
    remote: OnceCell<(Arc<dyn RemoteWalletControl>, RemoteCapabilities)>,
}

impl DestinationResolver {
    pub fn new(config: Option<MerchantConfig>) -> Self {
        Self {
            config,
            connector: None,
            remote: OnceCell::new(),
        }
    }

    /// Builder method to set the connector used for remote-control wallets.
    pub fn with_connector(mut self, connector: Arc<dyn RemoteWalletConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Resolve the active destination.
    ///
    /// Remote-control wallets are connected on first resolution and their
    /// advertised capabilities checked; the connection is reused afterwards.
    pub async fn resolve_active(&self) -> Result<WalletDestination> {
        let config = self
            .config
            .as_ref()
            .ok_or(ConfigurationError::NoActiveDestination)?;

        let destination = match config {
            MerchantConfig::ApiKey { api_key, wallet_id } => {
                WalletDestination::ApiKey(ApiKeyWallet::new(api_key.clone(), wallet_id.clone()))
            }
            MerchantConfig::LightningAddress { address, wallet_id } => {
                WalletDestination::LightningAddress(LightningAddressWallet {
                    address: address.clone(),
                    wallet_id: wallet_id.clone(),
                })
            }
            MerchantConfig::EcashMailbox { address } => {
                WalletDestination::EcashMailbox(EcashMailboxWallet {
                    address: address.clone(),
                })
            }
            MerchantConfig::RemoteControl { connection_uri } => {
                let (control, capabilities) = self
                    .remote
                    .get_or_try_init(|| self.connect_remote(connection_uri))
                    .await?
                    .clone();
                WalletDestination::RemoteControl(RemoteControlWallet::new(
                    connection_uri.clone(),
                    control,
                    capabilities,
                ))
            }
        };

        debug!(destination = %destination.label(), "Resolved active destination");
        Ok(destination)
    }

    async fn connect_remote(
        &self,
        connection_uri: &SecretString,
    ) -> Result<(Arc<dyn RemoteWalletControl>, RemoteCapabilities)> {
        let connector = self.connector.as_ref().ok_or_else(|| {
            ConfigurationError::Invalid("no remote wallet connector available".to_string())
        })?;

        let control = connector
            .connect(connection_uri.expose_secret())
            .await
            .map_err(remote_error)?;
        let capabilities = control.get_capabilities().await.map_err(remote_error)?;

        if !capabilities.contains(RemoteMethod::MakeInvoice) {
            return Err(ConfigurationError::MissingCapability {
                destination: DestinationKind::RemoteControl,
                capability: RemoteMethod::MakeInvoice.to_string(),
            }
            .into());
        }

        info!(
            methods = capabilities.iter().count(),
            "Connected to remote-control wallet"
        );
        Ok((control, capabilities))
    }
}

fn remote_error(err: ledger_core::LedgerError) -> ForwarderError {
    if err.is_transient() {
        ForwarderError::TransientIo(err)
    } else {
        ConfigurationError::Invalid(format!("remote wallet connection failed: {}", err)).into()
    }
}
