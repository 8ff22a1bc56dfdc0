//! Waypoint - multi-network blockchain connection manager
//!
//! Waypoint keeps an application's set of blockchain connections in line
//! with a desired-state list: one primary network plus any number of
//! secondaries, each reachable over a remote endpoint or an embedded light
//! client. Changing the desired list triggers reconciliation; everything
//! else (status, signers, chain handles) follows from it.
//!
//! ## Components
//!
//! - **Catalog**: static descriptors for every supported network
//! - **Store**: persisted desired-connections list, primary first
//! - **Orchestrator**: reconciles desired state against live connections
//! - **Factory**: resolves provider selections into live connections
//! - **Light client**: shared embedded engine with relay-chain reuse
//! - **Registry**: network id → live connection
//! - **Status**: copy-on-write status snapshots over a watch channel

pub mod catalog;
pub mod connection;
pub mod factory;
pub mod light_client;
pub mod orchestrator;
pub mod registry;
pub mod status;
pub mod store;
pub mod types;

pub use catalog::{ApiDialect, ChainSpecSource, NetworkCatalog, NetworkDescriptor, StaticChainSpec};
pub use connection::{
    ClientBuilder, ConnectOptions, Connection, ConnectionEvent, ProviderSelection, Signer,
    TransactionSigner, TransportConfig, TransportSpec,
};
pub use factory::ConnectionFactory;
pub use light_client::{
    AddChainOptions, ChainHandle, EngineBackend, EngineHandle, LightClientHost,
};
pub use orchestrator::Orchestrator;
pub use registry::{ConnectionRegistry, RegisteredConnection};
pub use status::{ConnectionStatus, StatusSnapshot, StatusTracker};
pub use store::{DesiredStore, KeyValueStore, MemoryKeyValueStore, NetworkConnection};
pub use types::{Result, WaypointError};
