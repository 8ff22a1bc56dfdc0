//! Connection factory — turns a descriptor plus a provider selection into a
//! live connection.
//!
//! The factory resolves the provider strategy (explicit endpoint, shuffled
//! endpoint pool, or light-client chain handle), asks the external
//! [`ClientBuilder`] to instantiate the dialect-appropriate client over that
//! transport, and binds the signer before handing the connection back. It
//! never retries: bounded retry with a fixed delay is the transport's job,
//! configured through [`TransportConfig`].

use std::sync::Arc;

use rand::seq::SliceRandom;
use tracing::debug;

use crate::catalog::{NetworkCatalog, NetworkDescriptor};
use crate::connection::{
    ClientBuilder, ConnectOptions, Connection, ProviderSelection, Signer, TransportConfig,
    TransportSpec,
};
use crate::light_client::LightClientHost;
use crate::types::{Result, WaypointError};

/// Builds connections for the orchestrator.
pub struct ConnectionFactory {
    builder: Arc<dyn ClientBuilder>,
    light_client: Arc<LightClientHost>,
    transport: TransportConfig,
}

impl ConnectionFactory {
    /// Create a factory over a client builder and a light-client host.
    pub fn new(builder: Arc<dyn ClientBuilder>, light_client: Arc<LightClientHost>) -> Self {
        Self {
            builder,
            light_client,
            transport: TransportConfig::default(),
        }
    }

    /// Override the transport retry configuration.
    pub fn with_transport_config(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// The light-client host, needed by teardown to release chain handles.
    pub fn light_client(&self) -> &Arc<LightClientHost> {
        &self.light_client
    }

    /// Create a live connection for a network.
    pub async fn create_connection(
        &self,
        catalog: &NetworkCatalog,
        descriptor: &NetworkDescriptor,
        provider: &ProviderSelection,
        cache_metadata: bool,
        signer: Option<Signer>,
    ) -> Result<Arc<dyn Connection>> {
        let transport = match provider {
            ProviderSelection::Endpoint(url) => TransportSpec::Endpoint {
                url: url.clone(),
                retry: self.transport,
            },
            ProviderSelection::RandomEndpoint => {
                if descriptor.endpoints.is_empty() {
                    return Err(WaypointError::NoEndpoints(descriptor.id.clone()));
                }
                let mut urls = descriptor.endpoints.clone();
                urls.shuffle(&mut rand::thread_rng());
                TransportSpec::EndpointPool {
                    urls,
                    retry: self.transport,
                }
            }
            ProviderSelection::LightClient => {
                let handle = self
                    .light_client
                    .get_or_create_chain(catalog, descriptor)
                    .await?;
                TransportSpec::LightClient(handle)
            }
        };

        debug!(network = %descriptor.id, transport = ?transport, "Creating connection");

        let connection = self
            .builder
            .connect(
                descriptor,
                ConnectOptions {
                    transport,
                    cache_metadata,
                },
            )
            .await?;

        if signer.is_some() {
            connection.set_signer(signer);
        }

        Ok(connection)
    }
}
