//! Reconciliation orchestrator.
//!
//! Owns the gap between the desired connection list and the live registry.
//! Every mutation of the desired state funnels into [`Orchestrator::reconcile`],
//! which connects the primary network first, then fans out over the
//! secondaries concurrently while tearing down whatever is no longer wanted.
//!
//! ## Failure isolation
//!
//! A primary connection failure is the caller's problem and propagates. A
//! secondary failure is logged, marked in the status tracker, and never
//! affects its siblings.
//!
//! ## Race safety
//!
//! Connection attempts are slow and the desired set can change underneath
//! them. Every status write and every registration re-checks membership
//! against the live desired store at completion time, so a connection that
//! resolves after its network was removed is discarded and torn down instead
//! of registered.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::catalog::NetworkCatalog;
use crate::connection::{Connection, ProviderSelection, Signer};
use crate::factory::ConnectionFactory;
use crate::registry::{ConnectionRegistry, RegisteredConnection};
use crate::status::{ConnectionStatus, StatusTracker};
use crate::store::{DesiredStore, NetworkConnection};
use crate::types::{Result, WaypointError};

/// Connection-manager entry point.
pub struct Orchestrator {
    catalog: Arc<NetworkCatalog>,
    factory: Arc<ConnectionFactory>,
    registry: Arc<ConnectionRegistry>,
    status: Arc<StatusTracker>,
    desired: Arc<DesiredStore>,
    signer: RwLock<Option<Signer>>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<NetworkCatalog>,
        factory: Arc<ConnectionFactory>,
        desired: Arc<DesiredStore>,
    ) -> Self {
        Self {
            catalog,
            factory,
            registry: Arc::new(ConnectionRegistry::new()),
            status: Arc::new(StatusTracker::new()),
            desired,
            signer: RwLock::new(None),
        }
    }

    /// Live connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Status tracker, for snapshots and subscriptions.
    pub fn status(&self) -> &Arc<StatusTracker> {
        &self.status
    }

    /// Desired-state store.
    pub fn desired(&self) -> &Arc<DesiredStore> {
        &self.desired
    }

    /// Network catalog.
    pub fn catalog(&self) -> &Arc<NetworkCatalog> {
        &self.catalog
    }

    /// Bring live state in line with the desired list: primary first, then
    /// secondaries. Returns the primary connection's result; secondary
    /// failures are isolated and surfaced only through the status tracker.
    pub async fn reconcile(&self) -> Result<()> {
        let primary_result = self.initialize_primary().await;
        self.initialize_secondaries().await;
        primary_result
    }

    /// Replace the whole desired list and reconcile.
    pub async fn set_networks(&self, list: Vec<NetworkConnection>) -> Result<()> {
        self.desired.replace(list).await?;
        self.reconcile().await
    }

    /// Switch the primary network (keeping the secondaries) and reconcile.
    pub async fn set_primary_network(
        &self,
        network_id: &str,
        provider: Option<ProviderSelection>,
    ) -> Result<()> {
        self.desired.set_primary(network_id, provider).await?;
        self.reconcile().await
    }

    /// Connect the primary network, tearing down any existing connection for
    /// its id first so a dangling client never outlives its replacement.
    pub async fn initialize_primary(&self) -> Result<()> {
        let Some(primary) = self.desired.primary() else {
            debug!("No primary network desired");
            return Ok(());
        };

        if self.registry.contains(&primary.network_id) {
            self.teardown_network(&primary.network_id).await;
        }
        self.set_status_if_active(&primary.network_id, ConnectionStatus::Connecting);

        info!(network = %primary.network_id, "Connecting primary network");
        self.connect_network(&primary).await
    }

    /// Connect every desired secondary, after tearing down connections whose
    /// networks left the desired set. Teardown runs sequentially; the
    /// connection attempts fan out concurrently. Never fails: each
    /// secondary's outcome lands in the status tracker.
    pub async fn initialize_secondaries(&self) {
        // Obsolete entries first, so their resources are released before new
        // connections compete for them.
        let mut known = self.registry.network_ids();
        for id in self.status.network_ids() {
            if !known.contains(&id) {
                known.push(id);
            }
        }
        for id in known {
            if !self.desired.contains(&id) {
                info!(network = %id, "Tearing down connection for removed network");
                self.teardown_network(&id).await;
            }
        }

        let mut pending = Vec::new();
        for connection in self.desired.connections().into_iter().skip(1) {
            if let Some(entry) = self.registry.remove(&connection.network_id) {
                let healthy = matches!(
                    self.status.get(&connection.network_id),
                    Some(ConnectionStatus::Connected | ConnectionStatus::Connecting)
                );
                if healthy && entry.provider == connection.effective_provider() {
                    debug!(network = %connection.network_id, "Secondary already live");
                    self.registry.insert(connection.network_id.clone(), entry);
                    continue;
                }
                // Provider changed or the connection died: rebuild from
                // scratch so a retry pass can recover it.
                self.status.remove(&connection.network_id);
                self.cleanup_client(&connection.network_id, entry).await;
            }
            self.set_status_if_active(&connection.network_id, ConnectionStatus::Connecting);
            pending.push(connection);
        }

        join_all(pending.iter().map(|connection| async move {
            if let Err(e) = self.connect_network(connection).await {
                warn!(network = %connection.network_id, "Secondary connection failed: {}", e);
            }
        }))
        .await;
    }

    /// Get the live connection for a network (the primary when `None`).
    pub fn get_client(&self, network_id: Option<&str>) -> Result<Arc<dyn Connection>> {
        let id = match network_id {
            Some(id) => id.to_string(),
            None => self
                .desired
                .primary()
                .map(|connection| connection.network_id)
                .ok_or_else(|| {
                    WaypointError::Config("No primary network configured".into())
                })?,
        };
        if !self.catalog.contains(&id) {
            return Err(WaypointError::UnknownNetwork(id));
        }
        self.registry
            .get(&id)
            .ok_or_else(|| WaypointError::Connection(format!("No live connection for {id}")))
    }

    /// Status of a network (the primary when `None`); `None` if untracked.
    pub fn get_status(&self, network_id: Option<&str>) -> Option<ConnectionStatus> {
        let id = match network_id {
            Some(id) => id.to_string(),
            None => self.desired.primary()?.network_id,
        };
        self.status.get(&id)
    }

    /// Replace the effective signer and propagate it to every live
    /// connection. Later connections pick it up at creation time.
    pub async fn set_signer(&self, signer: Option<Signer>) {
        *self.signer.write().await = signer;
        self.update_signer().await;
    }

    /// Re-propagate the currently-effective signer to every live connection.
    /// Idempotent.
    pub async fn update_signer(&self) {
        let signer = self.signer.read().await.clone();
        for (network_id, entry) in self.registry.all() {
            debug!(network = %network_id, "Propagating signer update");
            entry.connection.set_signer(signer.clone());
        }
    }

    /// Connect one desired network and register the result.
    async fn connect_network(&self, desired: &NetworkConnection) -> Result<()> {
        let network_id = &desired.network_id;
        let Some(descriptor) = self.catalog.get(network_id) else {
            // The desired store validates against the catalog, so this only
            // happens if the catalog shrank out from under a persisted list.
            warn!(network = %network_id, "Desired network missing from catalog");
            self.set_status_if_active(network_id, ConnectionStatus::NotConnected);
            return Ok(());
        };
        let provider = desired.effective_provider();
        let signer = self.signer.read().await.clone();

        match self
            .factory
            .create_connection(
                &self.catalog,
                descriptor,
                &provider,
                self.desired.cache_metadata(),
                signer,
            )
            .await
        {
            Ok(connection) => {
                self.register(network_id, connection, provider).await;
                Ok(())
            }
            Err(e) => {
                self.set_status_if_active(network_id, ConnectionStatus::Error);
                Err(e)
            }
        }
    }

    /// Register a freshly-built connection, unless its network dropped out
    /// of the desired set while the connection was being built.
    async fn register(
        &self,
        network_id: &str,
        connection: Arc<dyn Connection>,
        provider: ProviderSelection,
    ) {
        if !self.desired.contains(network_id) {
            info!(network = %network_id, "Discarding connection for no-longer-desired network");
            self.cleanup_client(
                network_id,
                RegisteredConnection {
                    connection,
                    provider,
                },
            )
            .await;
            return;
        }

        let displaced = self.registry.insert(
            network_id.to_string(),
            RegisteredConnection {
                connection: Arc::clone(&connection),
                provider,
            },
        );
        self.spawn_event_pump(network_id.to_string(), &connection);
        self.set_status_if_active(network_id, ConnectionStatus::Connected);
        info!(network = %network_id, "Network connected");

        if let Some(displaced) = displaced {
            self.cleanup_client(network_id, displaced).await;
        }
    }

    /// Status write guarded by live desired membership.
    fn set_status_if_active(&self, network_id: &str, status: ConnectionStatus) {
        if self.desired.contains(network_id) {
            self.status.set(network_id, status);
        }
    }

    /// Remove a network's connection and status entry, releasing its
    /// resources.
    async fn teardown_network(&self, network_id: &str) {
        let entry = self.registry.remove(network_id);
        self.status.remove(network_id);
        if let Some(entry) = entry {
            self.cleanup_client(network_id, entry).await;
        }
    }

    /// Disconnect a client and release its light-client chain handle if it
    /// had one. Failures are logged, never propagated.
    async fn cleanup_client(&self, network_id: &str, entry: RegisteredConnection) {
        if let Err(e) = entry.connection.disconnect().await {
            warn!(network = %network_id, "Disconnect failed: {}", e);
        }
        if entry.provider == ProviderSelection::LightClient {
            self.factory.light_client().remove_chain(network_id).await;
        }
    }

    /// Pump a connection's event stream into the status tracker. The task
    /// ends when the connection drops its sender side, when its network
    /// leaves the desired set, or when another connection replaces it.
    fn spawn_event_pump(&self, network_id: String, connection: &Arc<dyn Connection>) {
        let mut events = connection.events();
        let status = Arc::clone(&self.status);
        let desired = Arc::clone(&self.desired);
        let registry = Arc::clone(&self.registry);
        let identity = Arc::downgrade(connection);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        // Membership is re-checked per event, not captured at
                        // spawn time. A departed network ends the pump.
                        if !desired.contains(&network_id) {
                            break;
                        }
                        // A torn-down connection can emit a final event after
                        // its replacement registered; only the connection
                        // currently holding the registry slot may write.
                        let Some(connection) = identity.upgrade() else {
                            break;
                        };
                        let current = match registry.get(&network_id) {
                            Some(current) => current,
                            None => break,
                        };
                        if !Arc::ptr_eq(&current, &connection) {
                            break;
                        }
                        status.apply_event(&network_id, event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(network = %network_id, skipped, "Event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
