//! Desired-state store with durable persistence.
//!
//! Holds the ordered list of network connections the application wants
//! live. The first entry is the primary network. The store is the single
//! source of truth the orchestrator reconciles against, and its live
//! `contains` check is what guards against stale status updates from
//! connection attempts that outlived their network's membership.
//!
//! ## Persistence
//!
//! The last-known value is persisted as JSON through an abstract key-value
//! store, alongside a Sha256 fingerprint of the application-provided
//! defaults. On load, the persisted value is discarded (with a one-line
//! diagnostic) when it references a network id absent from the catalog, or
//! when the defaults fingerprint changed since last run. Persistence is
//! optional; without a backing store the desired state is memory-only.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::catalog::NetworkCatalog;
use crate::connection::ProviderSelection;
use crate::types::{Result, WaypointError};

/// Storage key for the persisted connection list.
pub const CONNECTIONS_KEY: &str = "waypoint.connections";

/// Storage key for the fingerprint of the application defaults.
pub const DEFAULTS_FINGERPRINT_KEY: &str = "waypoint.defaults";

/// Simple durable key-value capability.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory key-value store. Useful for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// One desired network connection. Identity is the network id; the provider
/// override is optional (absent means a randomly-selected endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConnection {
    pub network_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderSelection>,
}

impl NetworkConnection {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            network_id: network_id.into(),
            provider: None,
        }
    }

    pub fn with_provider(network_id: impl Into<String>, provider: ProviderSelection) -> Self {
        Self {
            network_id: network_id.into(),
            provider: Some(provider),
        }
    }

    /// The provider the factory should use.
    pub fn effective_provider(&self) -> ProviderSelection {
        self.provider
            .clone()
            .unwrap_or(ProviderSelection::RandomEndpoint)
    }
}

/// Ordered desired-connections list with optional durable backing.
pub struct DesiredStore {
    catalog: Arc<NetworkCatalog>,
    connections: RwLock<Vec<NetworkConnection>>,
    cache_metadata: AtomicBool,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl DesiredStore {
    /// Load the store, reconciling persisted state against the catalog and
    /// the application defaults.
    ///
    /// The defaults themselves must reference only known networks — that is
    /// a configuration error surfaced immediately. Persisted state is
    /// merely discarded when invalid.
    pub async fn load(
        kv: Option<Arc<dyn KeyValueStore>>,
        catalog: Arc<NetworkCatalog>,
        defaults: Vec<NetworkConnection>,
    ) -> Result<Self> {
        for connection in &defaults {
            if !catalog.contains(&connection.network_id) {
                return Err(WaypointError::Config(format!(
                    "Default network list references unknown network {}",
                    connection.network_id
                )));
            }
        }
        let defaults = dedupe(defaults);
        let fingerprint = fingerprint(&defaults);

        let mut effective = defaults;

        if let Some(kv) = &kv {
            let stored_fingerprint = match kv.get(DEFAULTS_FINGERPRINT_KEY).await {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to read defaults fingerprint: {}", e);
                    None
                }
            };

            match stored_fingerprint {
                Some(stored) if stored == fingerprint => {
                    if let Some(restored) = Self::restore(kv.as_ref(), &catalog).await {
                        effective = restored;
                    }
                }
                Some(_) => {
                    warn!("Default network list changed; discarding persisted connections");
                }
                None => {
                    debug!("No persisted connections found, using application defaults");
                }
            }
        }

        let store = Self {
            catalog,
            connections: RwLock::new(effective),
            cache_metadata: AtomicBool::new(false),
            kv,
        };
        // Best-effort write-back so the next run starts from this state.
        if let Err(e) = store.persist_fingerprint(&fingerprint).await {
            warn!("Failed to persist defaults fingerprint: {}", e);
        }
        if let Err(e) = store.persist().await {
            warn!("Failed to persist desired connections: {}", e);
        }
        Ok(store)
    }

    /// Read and validate the persisted connection list. Any failure falls
    /// back to the defaults with a single diagnostic line.
    async fn restore(
        kv: &dyn KeyValueStore,
        catalog: &NetworkCatalog,
    ) -> Option<Vec<NetworkConnection>> {
        let raw = match kv.get(CONNECTIONS_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted connections: {}", e);
                return None;
            }
        };
        let parsed: Vec<NetworkConnection> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Discarding unparseable persisted connections: {}", e);
                return None;
            }
        };
        if let Some(unknown) = parsed
            .iter()
            .find(|connection| !catalog.contains(&connection.network_id))
        {
            warn!(
                network = %unknown.network_id,
                "Persisted connections reference unknown network; using defaults"
            );
            return None;
        }
        Some(dedupe(parsed))
    }

    // Writers only ever replace the whole Vec, so a poisoned lock cannot
    // hold a partial list; recover the guard instead of panicking.
    fn entries(&self) -> std::sync::RwLockReadGuard<'_, Vec<NetworkConnection>> {
        self.connections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn entries_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<NetworkConnection>> {
        self.connections.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current connection list, primary first.
    pub fn connections(&self) -> Vec<NetworkConnection> {
        self.entries().clone()
    }

    /// The primary (first) desired connection, if any.
    pub fn primary(&self) -> Option<NetworkConnection> {
        self.entries().first().cloned()
    }

    /// Ids of all desired networks.
    pub fn network_ids(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|connection| connection.network_id.clone())
            .collect()
    }

    /// Live membership check — the race-condition guard reads this, never a
    /// snapshot taken at task start.
    pub fn contains(&self, network_id: &str) -> bool {
        self.entries()
            .iter()
            .any(|connection| connection.network_id == network_id)
    }

    /// Replace the whole list. Unknown network ids fail fast; duplicates
    /// keep their first occurrence.
    pub async fn replace(&self, list: Vec<NetworkConnection>) -> Result<()> {
        for connection in &list {
            if !self.catalog.contains(&connection.network_id) {
                return Err(WaypointError::UnknownNetwork(
                    connection.network_id.clone(),
                ));
            }
        }
        let list = dedupe(list);
        *self.entries_mut() = list;
        self.persist().await
    }

    /// Replace just the primary entry, preserving the secondaries.
    pub async fn set_primary(
        &self,
        network_id: &str,
        provider: Option<ProviderSelection>,
    ) -> Result<()> {
        let mut next = vec![NetworkConnection {
            network_id: network_id.to_string(),
            provider,
        }];
        next.extend(self.connections().into_iter().skip(1));
        self.replace(next).await
    }

    /// Whether clients should cache decoded chain metadata.
    pub fn cache_metadata(&self) -> bool {
        self.cache_metadata.load(Ordering::Relaxed)
    }

    pub fn set_cache_metadata(&self, enabled: bool) {
        self.cache_metadata.store(enabled, Ordering::Relaxed);
    }

    async fn persist(&self) -> Result<()> {
        let Some(kv) = &self.kv else { return Ok(()) };
        let serialized = serde_json::to_string(&self.connections())
            .map_err(|e| WaypointError::Persistence(e.to_string()))?;
        kv.put(CONNECTIONS_KEY, &serialized).await
    }

    async fn persist_fingerprint(&self, fingerprint: &str) -> Result<()> {
        let Some(kv) = &self.kv else { return Ok(()) };
        kv.put(DEFAULTS_FINGERPRINT_KEY, fingerprint).await
    }
}

/// Keep the first occurrence of each network id.
fn dedupe(list: Vec<NetworkConnection>) -> Vec<NetworkConnection> {
    let mut seen = std::collections::HashSet::new();
    list.into_iter()
        .filter(|connection| seen.insert(connection.network_id.clone()))
        .collect()
}

/// Sha256 fingerprint of the application defaults.
fn fingerprint(defaults: &[NetworkConnection]) -> String {
    let mut hasher = Sha256::new();
    for connection in defaults {
        hasher.update(connection.network_id.as_bytes());
        hasher.update(b"\0");
        if let Some(provider) = &connection.provider {
            // Serialization is the persisted string form of the provider.
            if let Ok(encoded) = serde_json::to_string(provider) {
                hasher.update(encoded.as_bytes());
            }
        }
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
