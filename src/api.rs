//! Top-level entry point for embedding applications.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ClientConfig, ConfigError};
use crate::crypto::{SymmetricKey, Topic};
use crate::pairing::{EstablishedSession, PairingHandshake, PairingResult};
use crate::pool::ResourcePool;
use crate::relay::{Circuit, CircuitRelayPool, RelayHandle};
use crate::rpc::{SecureRpcSession, SessionOptions};

/// Core interface for wallet-side relay functionality.
///
/// Owns one [`CircuitRelayPool`] shared by every pairing and session it
/// creates. Sessions leave the relay open when they close; closing the core
/// closes it.
pub struct WalletConnectCore<C: Circuit> {
    relay: Arc<CircuitRelayPool<C>>,
    config: ClientConfig,
}

impl<C: Circuit> std::fmt::Debug for WalletConnectCore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConnectCore")
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl<C: Circuit> WalletConnectCore<C> {
    /// Creates a core whose relay traffic runs over `circuits`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `config` fails validation.
    pub fn new(circuits: ResourcePool<C>, config: ClientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let relay = CircuitRelayPool::new(circuits, Vec::new(), config.ping_interval());
        info!(ping_interval_secs = config.ping_interval_secs, "relay client started");
        Ok(Self {
            relay: Arc::new(relay),
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The shared relay client.
    #[must_use]
    pub const fn relay(&self) -> &Arc<CircuitRelayPool<C>> {
        &self.relay
    }

    /// Pairs with the dapp behind `uri` and settles a session granting it
    /// `address`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the handshake.
    pub async fn pair(
        &self,
        uri: &str,
        address: &str,
        cancel: &CancellationToken,
    ) -> PairingResult<EstablishedSession> {
        let mut handshake = PairingHandshake::new(uri, self.handle(), self.config.clone())?;
        handshake.run(address, cancel).await
    }

    /// Rebuilds a previously settled session from its stored key. Call
    /// [`SecureRpcSession::subscribe`] before use.
    #[must_use]
    pub fn restore_session(&self, topic: Topic, key: SymmetricKey) -> SecureRpcSession {
        SecureRpcSession::new(topic, key, self.handle(), self.session_options())
    }

    /// Closes the relay client. Pending and later calls fail with the
    /// close reason.
    pub fn close(&self, reason: &str) {
        self.relay.close(reason);
    }

    fn handle(&self) -> Arc<dyn RelayHandle> {
        Arc::clone(&self.relay) as Arc<dyn RelayHandle>
    }

    fn session_options(&self) -> SessionOptions {
        SessionOptions::from_config(&self.config).with_shared_relay()
    }
}
