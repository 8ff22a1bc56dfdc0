//! Authoritative registry of live connections.
//!
//! Maps network ids to the connection currently serving them, together with
//! the provider selection used to build it — teardown needs that to know
//! whether a light-client chain handle has to be released. Mutators are
//! crate-private: only the orchestrator creates and destroys entries.

use std::sync::Arc;

use dashmap::DashMap;

use crate::connection::{Connection, ProviderSelection};

/// A registered connection and the provider it was built with.
#[derive(Clone)]
pub struct RegisteredConnection {
    pub connection: Arc<dyn Connection>,
    pub provider: ProviderSelection,
}

/// network id → live connection.
pub struct ConnectionRegistry {
    connections: DashMap<String, RegisteredConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Get the connection for a network.
    pub fn get(&self, network_id: &str) -> Option<Arc<dyn Connection>> {
        self.connections
            .get(network_id)
            .map(|entry| Arc::clone(&entry.connection))
    }

    /// Whether a network has a live connection.
    pub fn contains(&self, network_id: &str) -> bool {
        self.connections.contains_key(network_id)
    }

    /// Ids of all registered networks.
    pub fn network_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Register a connection, returning the displaced entry if one existed.
    pub(crate) fn insert(
        &self,
        network_id: String,
        entry: RegisteredConnection,
    ) -> Option<RegisteredConnection> {
        self.connections.insert(network_id, entry)
    }

    /// Remove and return a network's entry.
    pub(crate) fn remove(&self, network_id: &str) -> Option<RegisteredConnection> {
        self.connections
            .remove(network_id)
            .map(|(_, entry)| entry)
    }

    /// All entries, for signer fan-out.
    pub(crate) fn all(&self) -> Vec<(String, RegisteredConnection)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionEvent;
    use crate::types::Result;
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    struct FakeConnection {
        network_id: String,
        events: broadcast::Sender<ConnectionEvent>,
    }

    impl FakeConnection {
        fn new(network_id: &str) -> Arc<Self> {
            let (events, _) = broadcast::channel(4);
            Arc::new(Self {
                network_id: network_id.to_string(),
                events,
            })
        }
    }

    #[async_trait]
    impl Connection for FakeConnection {
        fn network_id(&self) -> &str {
            &self.network_id
        }
        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }
        fn set_signer(&self, _signer: Option<crate::connection::Signer>) {}
        fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
            self.events.subscribe()
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        registry.insert(
            "polkadot".into(),
            RegisteredConnection {
                connection: FakeConnection::new("polkadot"),
                provider: ProviderSelection::RandomEndpoint,
            },
        );

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("polkadot"));
        assert_eq!(registry.get("polkadot").unwrap().network_id(), "polkadot");

        let removed = registry.remove("polkadot").unwrap();
        assert_eq!(removed.provider, ProviderSelection::RandomEndpoint);
        assert!(registry.get("polkadot").is_none());
        assert!(registry.remove("polkadot").is_none());
    }

    #[test]
    fn test_insert_returns_displaced_entry() {
        let registry = ConnectionRegistry::new();
        registry.insert(
            "kusama".into(),
            RegisteredConnection {
                connection: FakeConnection::new("kusama"),
                provider: ProviderSelection::LightClient,
            },
        );
        let displaced = registry.insert(
            "kusama".into(),
            RegisteredConnection {
                connection: FakeConnection::new("kusama"),
                provider: ProviderSelection::RandomEndpoint,
            },
        );
        assert_eq!(displaced.unwrap().provider, ProviderSelection::LightClient);
        assert_eq!(registry.len(), 1);
    }
}
