//! Connection capability surface.
//!
//! The wire protocol itself is an external collaborator: the orchestrator
//! only needs an opaque [`Connection`] handle with a disconnect, a signer
//! slot, and an event stream. The [`ClientBuilder`] trait is the seam where
//! a real codec plugs in; tests plug in mocks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::broadcast;

use crate::catalog::NetworkDescriptor;
use crate::light_client::ChainHandle;
use crate::types::Result;

/// Default bounded retry attempts applied by endpoint transports.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;

/// Default fixed delay between endpoint connection attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Asynchronous events emitted by a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

/// Opaque transaction-signing capability.
///
/// Discovery and UI live outside this crate; the connection manager only
/// fans the currently-effective signer out to live connections.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account identifier this signer signs for.
    fn account(&self) -> String;

    /// Sign an opaque payload.
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Shared signer handle.
pub type Signer = Arc<dyn TransactionSigner>;

/// Live connection handle produced by a [`ClientBuilder`].
///
/// Exclusively owned by the connection registry entry for its network id;
/// nothing but the orchestrator calls `disconnect()`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Network this connection belongs to.
    fn network_id(&self) -> &str;

    /// Tear the connection down.
    async fn disconnect(&self) -> Result<()>;

    /// Replace the signer used for transaction submission.
    fn set_signer(&self, signer: Option<Signer>);

    /// Subscribe to connection health events.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

impl std::fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("network_id", &self.network_id())
            .finish()
    }
}

/// How the application wants a network reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSelection {
    /// Randomly-selected endpoint from the descriptor's pool.
    RandomEndpoint,
    /// Embedded light client.
    LightClient,
    /// One explicit endpoint.
    Endpoint(String),
}

// Persisted form: "random" / "light-client" / the endpoint URL itself.
impl Serialize for ProviderSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            ProviderSelection::RandomEndpoint => serializer.serialize_str("random"),
            ProviderSelection::LightClient => serializer.serialize_str("light-client"),
            ProviderSelection::Endpoint(url) => serializer.serialize_str(url),
        }
    }
}

impl<'de> Deserialize<'de> for ProviderSelection {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        match value.as_str() {
            "random" => Ok(ProviderSelection::RandomEndpoint),
            "light-client" => Ok(ProviderSelection::LightClient),
            "" => Err(D::Error::custom("empty provider selection")),
            _ => Ok(ProviderSelection::Endpoint(value)),
        }
    }
}

/// Retry behaviour applied by the transport when dialing endpoints.
///
/// Retries belong to the transport, not the orchestrator: a factory call
/// either resolves or fails after these bounded attempts.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Maximum connection attempts per endpoint.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_delay: DEFAULT_CONNECT_RETRY_DELAY,
        }
    }
}

/// Concrete transport resolved from a provider selection.
pub enum TransportSpec {
    /// One explicit endpoint.
    Endpoint { url: String, retry: TransportConfig },
    /// Shuffled pool of endpoints tried in order.
    EndpointPool {
        urls: Vec<String>,
        retry: TransportConfig,
    },
    /// Chain handle obtained from the light-client host.
    LightClient(Arc<dyn ChainHandle>),
}

impl fmt::Debug for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSpec::Endpoint { url, .. } => {
                f.debug_struct("Endpoint").field("url", url).finish()
            }
            TransportSpec::EndpointPool { urls, .. } => {
                f.debug_struct("EndpointPool").field("urls", urls).finish()
            }
            TransportSpec::LightClient(_) => f.write_str("LightClient"),
        }
    }
}

/// Options forwarded to the external client builder.
pub struct ConnectOptions {
    /// Resolved transport for the connection.
    pub transport: TransportSpec,
    /// Whether the client should cache decoded chain metadata.
    pub cache_metadata: bool,
}

/// External wire-client capability.
///
/// Instantiates the dialect-appropriate client for a descriptor over the
/// given transport. Handshake failures surface as
/// [`WaypointError::Connection`](crate::WaypointError::Connection).
#[async_trait]
pub trait ClientBuilder: Send + Sync {
    async fn connect(
        &self,
        descriptor: &NetworkDescriptor,
        options: ConnectOptions,
    ) -> Result<Arc<dyn Connection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selection_serde_forms() {
        let json = serde_json::to_string(&ProviderSelection::LightClient).unwrap();
        assert_eq!(json, "\"light-client\"");

        let json = serde_json::to_string(&ProviderSelection::RandomEndpoint).unwrap();
        assert_eq!(json, "\"random\"");

        let json =
            serde_json::to_string(&ProviderSelection::Endpoint("wss://rpc.example".into()))
                .unwrap();
        assert_eq!(json, "\"wss://rpc.example\"");

        let parsed: ProviderSelection = serde_json::from_str("\"light-client\"").unwrap();
        assert_eq!(parsed, ProviderSelection::LightClient);

        let parsed: ProviderSelection = serde_json::from_str("\"wss://rpc.example\"").unwrap();
        assert_eq!(parsed, ProviderSelection::Endpoint("wss://rpc.example".into()));

        assert!(serde_json::from_str::<ProviderSelection>("\"\"").is_err());
    }

    #[test]
    fn test_transport_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.max_attempts, DEFAULT_CONNECT_ATTEMPTS);
        assert_eq!(config.retry_delay, DEFAULT_CONNECT_RETRY_DELAY);
    }
}
