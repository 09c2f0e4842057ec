//! In-memory cluster
//!
//! A metadata server and a set of chunk servers living in the client's own
//! process. Used by the test suites, and usable by anything that wants a
//! throwaway file system.

pub mod chunk_server;
pub mod meta_server;

use std::sync::Arc;

pub use chunk_server::{MemoryChunkServer, MemoryConnector};
pub use meta_server::MemoryMetaServer;

use crate::api::QfsClient;
use crate::config::ClientConfig;
use crate::error::AccessResult;
use crate::rpc::ServerLocation;

/// Metadata server wired to `n` chunk servers
pub struct MemoryCluster {
    meta: Arc<MemoryMetaServer>,
    connector: Arc<MemoryConnector>,
}

impl MemoryCluster {
    pub fn new(chunk_servers: u16) -> Self {
        let meta = Arc::new(MemoryMetaServer::new());
        let connector = Arc::new(MemoryConnector::with_servers(chunk_servers));
        for server in connector.servers() {
            meta.register_chunk_server(server);
        }
        tracing::debug!("in-memory cluster with {} chunk servers", chunk_servers);
        Self { meta, connector }
    }

    pub fn meta(&self) -> &Arc<MemoryMetaServer> {
        &self.meta
    }

    pub fn connector(&self) -> &Arc<MemoryConnector> {
        &self.connector
    }

    pub fn chunk_server(&self, index: usize) -> Option<Arc<MemoryChunkServer>> {
        self.connector.server(index)
    }

    pub fn chunk_servers(&self) -> Vec<Arc<MemoryChunkServer>> {
        self.connector.servers()
    }

    pub fn chunk_server_locations(&self) -> Vec<ServerLocation> {
        self.connector.locations()
    }

    /// New client of this cluster
    pub fn client(&self, config: ClientConfig) -> AccessResult<QfsClient> {
        QfsClient::new(config, self.meta.clone(), self.connector.clone())
    }

    /// New client with the default configuration
    pub fn default_client(&self) -> AccessResult<QfsClient> {
        self.client(ClientConfig::default())
    }
}
