//! Embedded light-client host.
//!
//! ## Overview
//!
//! Booting the embedded peer-to-peer engine is expensive, so one host
//! amortizes it across every network that runs in light-client mode. The
//! host owns:
//!
//! 1. The engine singleton, booted lazily on first use
//! 2. A registry of chain handles keyed by network id
//! 3. Relay-chain reuse: a parent chain handle is created at most once and
//!    shared by every child network that declares it as a parent
//!
//! ## Concurrency
//!
//! One async mutex guards the engine slot and the chain map across the whole
//! get-or-create critical section. Check-then-create is therefore atomic
//! with respect to cooperative yield points: two concurrent calls for the
//! same network id cannot both create a handle, and a parent handle is
//! always created before its dependent child.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::{NetworkCatalog, NetworkDescriptor};
use crate::types::{Result, WaypointError};

/// Options for registering a chain with the engine.
pub struct AddChainOptions {
    /// Chain specification blob.
    pub chain_spec: String,
    /// Relay chains this chain may depend on for validation context.
    pub potential_relay_chains: Vec<Arc<dyn ChainHandle>>,
}

/// External engine capability: boots the shared background engine.
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn boot(&self) -> Result<Arc<dyn EngineHandle>>;
}

/// Handle to a booted engine.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    async fn add_chain(&self, options: AddChainOptions) -> Result<Arc<dyn ChainHandle>>;
}

/// Handle to one chain registered with the engine.
#[async_trait]
pub trait ChainHandle: Send + Sync {
    /// Release the chain from the engine.
    async fn remove(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn ChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainHandle").finish()
    }
}

#[derive(Default)]
struct HostState {
    engine: Option<Arc<dyn EngineHandle>>,
    chains: HashMap<String, Arc<dyn ChainHandle>>,
}

/// Process-wide light-client host.
///
/// Owned and injected rather than ambient: the orchestrator's factory holds
/// the single instance, and tests build isolated hosts.
pub struct LightClientHost {
    backend: Arc<dyn EngineBackend>,
    state: Mutex<HostState>,
}

impl LightClientHost {
    /// Create a host over an engine backend. The engine is not booted until
    /// the first chain is requested.
    pub fn new(backend: Arc<dyn EngineBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Get the chain handle for a network, creating it (and its relay chain,
    /// and the engine itself) as needed.
    ///
    /// Fails fast with [`WaypointError::MissingChainSpec`] before touching
    /// the engine when the descriptor (or a required, not-yet-created
    /// parent) has no chain spec. Engine boot failures propagate and leave
    /// the host unbooted so a later attempt can retry.
    pub async fn get_or_create_chain(
        &self,
        catalog: &NetworkCatalog,
        descriptor: &NetworkDescriptor,
    ) -> Result<Arc<dyn ChainHandle>> {
        let spec_source = descriptor
            .chain_spec
            .as_ref()
            .ok_or_else(|| WaypointError::MissingChainSpec(descriptor.id.clone()))?;

        // Held across every await below: check-then-create must not
        // interleave with another creation for the same id.
        let mut state = self.state.lock().await;

        if let Some(handle) = state.chains.get(&descriptor.id) {
            debug!(network = %descriptor.id, "Reusing existing chain handle");
            return Ok(Arc::clone(handle));
        }

        let parent = match &descriptor.parent_network {
            Some(parent_id) => Some(
                catalog
                    .get(parent_id)
                    .ok_or_else(|| WaypointError::UnknownNetwork(parent_id.clone()))?,
            ),
            None => None,
        };

        // A parent that still needs creating must have its own spec; check
        // before any engine work.
        if let Some(parent) = parent {
            if parent.chain_spec.is_none() && !state.chains.contains_key(&parent.id) {
                return Err(WaypointError::MissingChainSpec(parent.id.clone()));
            }
        }

        let engine = match &state.engine {
            Some(engine) => Arc::clone(engine),
            None => {
                let engine = self.backend.boot().await?;
                info!("Light-client engine booted");
                state.engine = Some(Arc::clone(&engine));
                engine
            }
        };

        // Relay chain first, so the child can reference it.
        let mut relay_chains = Vec::new();
        if let Some(parent) = parent {
            let parent_handle = match state.chains.get(&parent.id) {
                Some(handle) => Arc::clone(handle),
                None => {
                    let source = parent
                        .chain_spec
                        .as_ref()
                        .ok_or_else(|| WaypointError::MissingChainSpec(parent.id.clone()))?;
                    let chain_spec = source.load().await?;
                    let handle = engine
                        .add_chain(AddChainOptions {
                            chain_spec,
                            potential_relay_chains: Vec::new(),
                        })
                        .await?;
                    info!(network = %parent.id, "Relay chain handle created");
                    state.chains.insert(parent.id.clone(), Arc::clone(&handle));
                    handle
                }
            };
            relay_chains.push(parent_handle);
        }

        let chain_spec = spec_source.load().await?;
        let handle = engine
            .add_chain(AddChainOptions {
                chain_spec,
                potential_relay_chains: relay_chains,
            })
            .await?;
        info!(network = %descriptor.id, "Light-client chain handle created");
        state.chains.insert(descriptor.id.clone(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Release the chain handle for a network. Idempotent; removal failures
    /// are logged, never propagated.
    ///
    /// A relay handle is only released when its own network id is removed,
    /// not when the last child goes away.
    pub async fn remove_chain(&self, network_id: &str) {
        let handle = self.state.lock().await.chains.remove(network_id);
        if let Some(handle) = handle {
            match handle.remove().await {
                Ok(()) => info!(network = %network_id, "Light-client chain handle released"),
                Err(e) => {
                    warn!(network = %network_id, "Chain handle removal failed: {}", e)
                }
            }
        }
    }

    /// Number of chain handles currently registered.
    pub async fn chain_count(&self) -> usize {
        self.state.lock().await.chains.len()
    }

    /// Whether the engine has been booted.
    pub async fn is_booted(&self) -> bool {
        self.state.lock().await.engine.is_some()
    }
}
