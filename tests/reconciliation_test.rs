//! End-to-end reconciliation integration tests
//!
//! Drives the orchestrator through the public API with mock wire clients
//! and a mock light-client engine, covering:
//! - Cold start with observable Connecting → Connected transitions
//! - Light-client provisioning, relay-chain reuse, and spec failures
//! - Desired-state persistence across restarts
//! - Wholesale ecosystem switches
//! - Signer propagation to live connections

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, Notify};

use waypoint::{
    AddChainOptions, ApiDialect, ChainHandle, ClientBuilder, ConnectOptions, Connection,
    ConnectionEvent, ConnectionStatus, DesiredStore, EngineBackend, EngineHandle, KeyValueStore,
    LightClientHost, MemoryKeyValueStore, NetworkCatalog, NetworkConnection, NetworkDescriptor,
    Orchestrator, ProviderSelection, Signer, StaticChainSpec, TransactionSigner,
};

// =============================================================================
// Mock wire clients
// =============================================================================

struct MockConnection {
    network_id: String,
    disconnects: AtomicUsize,
    signer: Mutex<Option<Signer>>,
    events: broadcast::Sender<ConnectionEvent>,
}

#[async_trait]
impl Connection for MockConnection {
    fn network_id(&self) -> &str {
        &self.network_id
    }
    async fn disconnect(&self) -> waypoint::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    fn set_signer(&self, signer: Option<Signer>) {
        *self.signer.lock().unwrap() = signer;
    }
    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}

#[derive(Default)]
struct MockBuilder {
    failing: HashSet<String>,
    gated: Option<(String, Arc<Notify>)>,
    built: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockBuilder {
    fn built_for(&self, network_id: &str) -> Vec<Arc<MockConnection>> {
        self.built
            .lock()
            .unwrap()
            .iter()
            .filter(|connection| connection.network_id == network_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ClientBuilder for MockBuilder {
    async fn connect(
        &self,
        descriptor: &NetworkDescriptor,
        _options: ConnectOptions,
    ) -> waypoint::Result<Arc<dyn Connection>> {
        if let Some((gated_id, gate)) = &self.gated {
            if *gated_id == descriptor.id {
                gate.notified().await;
            }
        }
        if self.failing.contains(&descriptor.id) {
            return Err(waypoint::WaypointError::Connection(format!(
                "handshake refused: {}",
                descriptor.id
            )));
        }
        let (events, _) = broadcast::channel(8);
        let connection = Arc::new(MockConnection {
            network_id: descriptor.id.clone(),
            disconnects: AtomicUsize::new(0),
            signer: Mutex::new(None),
            events,
        });
        self.built.lock().unwrap().push(Arc::clone(&connection));
        Ok(connection as Arc<dyn Connection>)
    }
}

// =============================================================================
// Mock light-client engine
// =============================================================================

struct MockChain;

#[async_trait]
impl ChainHandle for MockChain {
    async fn remove(&self) -> waypoint::Result<()> {
        Ok(())
    }
}

struct MockEngine {
    add_chain_calls: AtomicUsize,
}

#[async_trait]
impl EngineHandle for MockEngine {
    async fn add_chain(
        &self,
        _options: AddChainOptions,
    ) -> waypoint::Result<Arc<dyn ChainHandle>> {
        self.add_chain_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockChain))
    }
}

struct MockBackend {
    boots: AtomicUsize,
    engine: Arc<MockEngine>,
}

impl MockBackend {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            boots: AtomicUsize::new(0),
            engine: Arc::new(MockEngine {
                add_chain_calls: AtomicUsize::new(0),
            }),
        })
    }
}

#[async_trait]
impl EngineBackend for MockBackend {
    async fn boot(&self) -> waypoint::Result<Arc<dyn EngineHandle>> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        Ok(self.engine.clone() as Arc<dyn EngineHandle>)
    }
}

// =============================================================================
// Fixtures
// =============================================================================

fn light_descriptor(id: &str) -> NetworkDescriptor {
    NetworkDescriptor::new(id, vec![format!("wss://{id}.example")], ApiDialect::Current)
        .with_chain_spec(Arc::new(StaticChainSpec(format!("{{\"id\":\"{id}\"}}"))))
}

fn catalog() -> Arc<NetworkCatalog> {
    Arc::new(
        NetworkCatalog::new(vec![
            light_descriptor("polkadot"),
            light_descriptor("asset-hub").with_parent("polkadot"),
            light_descriptor("bridge-hub").with_parent("polkadot"),
            // kusama ships without a chain spec: endpoint providers only.
            NetworkDescriptor::new(
                "kusama",
                vec!["wss://kusama.example".into()],
                ApiDialect::Current,
            ),
            light_descriptor("westend"),
        ])
        .unwrap(),
    )
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    builder: Arc<MockBuilder>,
    backend: Arc<MockBackend>,
}

/// The tracker's keyset must equal the desired-store id set after every
/// reconciliation pass: no leftover entries, no missing ones.
fn assert_status_matches_desired(orchestrator: &Orchestrator) {
    let mut tracked = orchestrator.status().network_ids();
    let mut desired = orchestrator.desired().network_ids();
    tracked.sort();
    desired.sort();
    assert_eq!(tracked, desired);
}

async fn harness(
    builder: MockBuilder,
    kv: Option<Arc<dyn KeyValueStore>>,
    defaults: Vec<NetworkConnection>,
) -> Harness {
    let catalog = catalog();
    let builder = Arc::new(builder);
    let backend = MockBackend::new();
    let host = Arc::new(LightClientHost::new(backend.clone()));
    let factory = Arc::new(waypoint::ConnectionFactory::new(builder.clone(), host));
    let desired = Arc::new(
        DesiredStore::load(kv, Arc::clone(&catalog), defaults)
            .await
            .unwrap(),
    );
    Harness {
        orchestrator: Arc::new(Orchestrator::new(catalog, factory, desired)),
        builder,
        backend,
    }
}

// =============================================================================
// Cold start
// =============================================================================

#[tokio::test]
async fn test_cold_start_transitions_through_connecting() {
    let gate = Arc::new(Notify::new());
    let mut builder = MockBuilder::default();
    builder.gated = Some(("polkadot".to_string(), Arc::clone(&gate)));
    let h = harness(builder, None, vec![NetworkConnection::new("polkadot")]).await;

    let mut rx = h.orchestrator.status().subscribe();
    let task = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.reconcile().await })
    };

    // The gate holds the connection attempt open, so the intermediate
    // Connecting state is observable.
    rx.wait_for(|snapshot| snapshot.get("polkadot") == Some(&ConnectionStatus::Connecting))
        .await
        .unwrap();

    gate.notify_one();
    task.await.unwrap().unwrap();

    rx.wait_for(|snapshot| snapshot.get("polkadot") == Some(&ConnectionStatus::Connected))
        .await
        .unwrap();
    assert_eq!(
        h.orchestrator.get_client(None).unwrap().network_id(),
        "polkadot"
    );
    assert_status_matches_desired(&h.orchestrator);
}

// =============================================================================
// Light-client provisioning
// =============================================================================

#[tokio::test]
async fn test_relay_chain_reused_across_children() {
    let h = harness(
        MockBuilder::default(),
        None,
        vec![
            NetworkConnection::with_provider("asset-hub", ProviderSelection::LightClient),
            NetworkConnection::with_provider("bridge-hub", ProviderSelection::LightClient),
        ],
    )
    .await;

    h.orchestrator.reconcile().await.unwrap();

    assert_eq!(
        h.orchestrator.get_status(Some("asset-hub")),
        Some(ConnectionStatus::Connected)
    );
    assert_eq!(
        h.orchestrator.get_status(Some("bridge-hub")),
        Some(ConnectionStatus::Connected)
    );
    // One engine boot; polkadot created once as relay plus the two children.
    assert_eq!(h.backend.boots.load(Ordering::SeqCst), 1);
    assert_eq!(h.backend.engine.add_chain_calls.load(Ordering::SeqCst), 3);
    assert_status_matches_desired(&h.orchestrator);
}

#[tokio::test]
async fn test_light_client_without_spec_marks_error_and_skips_boot() {
    let h = harness(
        MockBuilder::default(),
        None,
        vec![
            NetworkConnection::new("polkadot"),
            NetworkConnection::with_provider("kusama", ProviderSelection::LightClient),
        ],
    )
    .await;

    h.orchestrator.reconcile().await.unwrap();

    assert_eq!(
        h.orchestrator.get_status(Some("polkadot")),
        Some(ConnectionStatus::Connected)
    );
    assert_eq!(
        h.orchestrator.get_status(Some("kusama")),
        Some(ConnectionStatus::Error)
    );
    // The missing spec is caught before the engine is ever booted.
    assert_eq!(h.backend.boots.load(Ordering::SeqCst), 0);
    assert_status_matches_desired(&h.orchestrator);
}

// =============================================================================
// Persistence across restarts
// =============================================================================

#[tokio::test]
async fn test_desired_state_survives_restart() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let defaults = vec![NetworkConnection::new("polkadot")];

    let first = harness(
        MockBuilder::default(),
        Some(Arc::clone(&kv)),
        defaults.clone(),
    )
    .await;
    first.orchestrator.reconcile().await.unwrap();
    first
        .orchestrator
        .set_primary_network("westend", Some(ProviderSelection::LightClient))
        .await
        .unwrap();
    drop(first);

    // Same defaults, same backing store: the user's choice wins.
    let second = harness(MockBuilder::default(), Some(kv), defaults).await;
    second.orchestrator.reconcile().await.unwrap();
    assert_eq!(
        second.orchestrator.get_client(None).unwrap().network_id(),
        "westend"
    );
    assert_status_matches_desired(&second.orchestrator);
}

#[tokio::test]
async fn test_persisted_unknown_network_falls_back_to_defaults() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    let defaults = vec![NetworkConnection::new("polkadot")];

    let first = harness(
        MockBuilder::default(),
        Some(Arc::clone(&kv)),
        defaults.clone(),
    )
    .await;
    drop(first);
    // Simulate a catalog that lost a network the last run persisted.
    kv.put("waypoint.connections", "[{\"networkId\":\"rococo\"}]")
        .await
        .unwrap();

    let second = harness(MockBuilder::default(), Some(kv), defaults).await;
    second.orchestrator.reconcile().await.unwrap();
    assert_eq!(
        second.orchestrator.get_client(None).unwrap().network_id(),
        "polkadot"
    );
    assert_eq!(second.orchestrator.get_status(Some("rococo")), None);
    assert_status_matches_desired(&second.orchestrator);
}

// =============================================================================
// Ecosystem switch
// =============================================================================

#[tokio::test]
async fn test_wholesale_network_switch() {
    let h = harness(
        MockBuilder::default(),
        None,
        vec![
            NetworkConnection::new("polkadot"),
            NetworkConnection::new("asset-hub"),
        ],
    )
    .await;
    h.orchestrator.reconcile().await.unwrap();
    assert_eq!(h.orchestrator.registry().len(), 2);
    assert_status_matches_desired(&h.orchestrator);

    h.orchestrator
        .set_networks(vec![
            NetworkConnection::new("kusama"),
            NetworkConnection::new("westend"),
        ])
        .await
        .unwrap();

    // Old ecosystem fully torn down, new one fully live.
    assert_eq!(h.orchestrator.registry().len(), 2);
    assert!(h.orchestrator.registry().contains("kusama"));
    assert!(h.orchestrator.registry().contains("westend"));
    assert_eq!(h.orchestrator.get_status(Some("polkadot")), None);
    assert_eq!(h.orchestrator.get_status(Some("asset-hub")), None);
    for id in ["polkadot", "asset-hub"] {
        let old = h.builder.built_for(id);
        assert_eq!(old[0].disconnects.load(Ordering::SeqCst), 1);
    }
    assert_status_matches_desired(&h.orchestrator);
}

// =============================================================================
// Signer propagation
// =============================================================================

struct StaticSigner(&'static str);

#[async_trait]
impl TransactionSigner for StaticSigner {
    fn account(&self) -> String {
        self.0.to_string()
    }
    async fn sign(&self, _payload: &[u8]) -> waypoint::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_signer_reaches_existing_and_future_connections() {
    let h = harness(
        MockBuilder::default(),
        None,
        vec![NetworkConnection::new("polkadot")],
    )
    .await;
    h.orchestrator.reconcile().await.unwrap();

    h.orchestrator
        .set_signer(Some(Arc::new(StaticSigner("alice"))))
        .await;
    let existing = &h.builder.built_for("polkadot")[0];
    assert_eq!(
        existing.signer.lock().unwrap().as_ref().unwrap().account(),
        "alice"
    );

    // A network added after the signer was set gets it at creation time.
    h.orchestrator
        .set_networks(vec![
            NetworkConnection::new("polkadot"),
            NetworkConnection::new("kusama"),
        ])
        .await
        .unwrap();
    let added = &h.builder.built_for("kusama")[0];
    assert_eq!(
        added.signer.lock().unwrap().as_ref().unwrap().account(),
        "alice"
    );

    h.orchestrator.set_signer(None).await;
    assert!(added.signer.lock().unwrap().is_none());
}
