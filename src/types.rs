//! Core error and result types for Waypoint.

use thiserror::Error;

/// Errors produced by the connection manager.
#[derive(Error, Debug)]
pub enum WaypointError {
    /// A network id was referenced that is not present in the catalog.
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    /// A network descriptor has no endpoints to connect to.
    #[error("Network {0} has no endpoints configured")]
    NoEndpoints(String),

    /// Light-client mode was requested for a network without a chain spec.
    #[error("Network {0} has no light-client chain spec")]
    MissingChainSpec(String),

    /// The embedded light-client engine failed.
    #[error("Light-client engine error: {0}")]
    Engine(String),

    /// Transport or handshake failure while establishing a connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Durable persistence failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, WaypointError>;
