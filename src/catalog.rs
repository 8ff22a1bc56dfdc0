//! Network catalog — static descriptors for every network the host
//! application supports.
//!
//! Descriptors are loaded once at startup and never mutated. The catalog
//! validates referential integrity up front: a `parent_network` reference
//! that does not resolve is a configuration error, caught before any
//! connection work starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{Result, WaypointError};

/// Which client variant the connection factory instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiDialect {
    /// Older RPC surface still served by long-lived networks.
    Legacy,
    /// Current RPC surface.
    Current,
}

/// Async supplier of a light-client chain specification blob.
///
/// Chain specs are large and often fetched or decompressed lazily, so the
/// catalog stores a supplier rather than the blob itself.
#[async_trait]
pub trait ChainSpecSource: Send + Sync {
    /// Load the chain spec (typically a JSON document).
    async fn load(&self) -> Result<String>;
}

/// Chain spec held in memory. Useful for bundled specs and tests.
pub struct StaticChainSpec(pub String);

#[async_trait]
impl ChainSpecSource for StaticChainSpec {
    async fn load(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Immutable description of one network.
#[derive(Clone)]
pub struct NetworkDescriptor {
    /// Unique network id (e.g., "polkadot").
    pub id: String,
    /// Ordered list of wire addresses for endpoint-based providers.
    pub endpoints: Vec<String>,
    /// Client variant to instantiate for this network.
    pub dialect: ApiDialect,
    /// Presence enables light-client mode for this network.
    pub chain_spec: Option<Arc<dyn ChainSpecSource>>,
    /// Relay chain this network depends on in light-client mode.
    pub parent_network: Option<String>,
}

impl fmt::Debug for NetworkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkDescriptor")
            .field("id", &self.id)
            .field("endpoints", &self.endpoints)
            .field("dialect", &self.dialect)
            .field("chain_spec", &self.chain_spec.is_some())
            .field("parent_network", &self.parent_network)
            .finish()
    }
}

impl NetworkDescriptor {
    /// Create a descriptor with endpoint addresses.
    pub fn new(id: impl Into<String>, endpoints: Vec<String>, dialect: ApiDialect) -> Self {
        Self {
            id: id.into(),
            endpoints,
            dialect,
            chain_spec: None,
            parent_network: None,
        }
    }

    /// Attach a chain spec supplier, enabling light-client mode.
    pub fn with_chain_spec(mut self, source: Arc<dyn ChainSpecSource>) -> Self {
        self.chain_spec = Some(source);
        self
    }

    /// Declare a relay chain dependency for light-client mode.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_network = Some(parent_id.into());
        self
    }
}

/// Id-keyed catalog of network descriptors.
pub struct NetworkCatalog {
    networks: HashMap<String, NetworkDescriptor>,
}

impl NetworkCatalog {
    /// Build a catalog, validating ids and parent references.
    pub fn new(descriptors: Vec<NetworkDescriptor>) -> Result<Self> {
        let mut networks: HashMap<String, NetworkDescriptor> = HashMap::new();
        for descriptor in descriptors {
            if networks
                .insert(descriptor.id.clone(), descriptor.clone())
                .is_some()
            {
                return Err(WaypointError::Config(format!(
                    "Duplicate network id in catalog: {}",
                    descriptor.id
                )));
            }
        }
        for descriptor in networks.values() {
            if let Some(parent_id) = &descriptor.parent_network {
                if !networks.contains_key(parent_id) {
                    return Err(WaypointError::Config(format!(
                        "Network {} references unknown parent {}",
                        descriptor.id, parent_id
                    )));
                }
            }
        }
        Ok(Self { networks })
    }

    /// Look up a descriptor by network id.
    pub fn get(&self, network_id: &str) -> Option<&NetworkDescriptor> {
        self.networks.get(network_id)
    }

    /// Check whether a network id exists in the catalog.
    pub fn contains(&self, network_id: &str) -> bool {
        self.networks.contains_key(network_id)
    }

    /// All network ids in the catalog.
    pub fn network_ids(&self) -> Vec<String> {
        self.networks.keys().cloned().collect()
    }

    /// Number of networks in the catalog.
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str) -> NetworkDescriptor {
        NetworkDescriptor::new(
            id,
            vec![format!("wss://{id}.example")],
            ApiDialect::Current,
        )
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog =
            NetworkCatalog::new(vec![descriptor("polkadot"), descriptor("kusama")]).unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("polkadot"));
        assert!(catalog.get("kusama").is_some());
        assert!(catalog.get("rococo").is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let result = NetworkCatalog::new(vec![descriptor("polkadot"), descriptor("polkadot")]);
        assert!(matches!(result, Err(WaypointError::Config(_))));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let child = descriptor("asset-hub").with_parent("polkadot");
        let result = NetworkCatalog::new(vec![child]);
        assert!(matches!(result, Err(WaypointError::Config(_))));
    }

    #[test]
    fn test_valid_parent_reference() {
        let relay = descriptor("polkadot");
        let child = descriptor("asset-hub").with_parent("polkadot");
        let catalog = NetworkCatalog::new(vec![relay, child]).unwrap();
        assert_eq!(
            catalog.get("asset-hub").unwrap().parent_network.as_deref(),
            Some("polkadot")
        );
    }

    #[tokio::test]
    async fn test_static_chain_spec_loads() {
        let source = StaticChainSpec("{\"name\":\"polkadot\"}".to_string());
        assert_eq!(source.load().await.unwrap(), "{\"name\":\"polkadot\"}");
    }
}
