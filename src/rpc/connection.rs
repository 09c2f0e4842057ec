//! Chunk server connection management
//!
//! One pool per client instance. Connections are opened lazily through the
//! client's [`ChunkServerConnector`] and shared by every channel of that
//! client.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::rpc::{ChunkServerClient, ChunkServerConnector, RpcResult, ServerLocation};

/// Connection pool for chunk server clients
pub struct ConnectionPool {
    connector: Arc<dyn ChunkServerConnector>,
    connections: Mutex<HashMap<ServerLocation, Arc<dyn ChunkServerClient>>>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn ChunkServerConnector>) -> Self {
        Self {
            connector,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create a connection to a chunk server
    pub async fn get_or_connect(
        &self,
        location: &ServerLocation,
    ) -> RpcResult<Arc<dyn ChunkServerClient>> {
        let existing = self.connections.lock().get(location).cloned();
        if let Some(client) = existing {
            tracing::trace!("Reusing existing connection to {}", location);
            return Ok(client);
        }

        tracing::debug!("Connecting to chunk server {}", location);
        let client = self.connector.connect(location).await?;

        // Another task may have connected meanwhile; the first client wins.
        let mut connections = self.connections.lock();
        let client = connections
            .entry(location.clone())
            .or_insert(client)
            .clone();
        Ok(client)
    }

    /// Drop a connection after a transport failure so the next call reconnects
    pub fn evict(&self, location: &ServerLocation) {
        if self.connections.lock().remove(location).is_some() {
            tracing::debug!("Evicted connection to {}", location);
        }
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Close all connections
    pub fn close_all(&self) {
        let mut connections = self.connections.lock();
        tracing::debug!("Closing {} chunk server connections", connections.len());
        connections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;

    #[tokio::test]
    async fn test_get_or_connect_reuses_client() {
        let connector = MemoryConnector::with_servers(2);
        let locations = connector.locations();
        let pool = ConnectionPool::new(Arc::new(connector));

        let a = pool.get_or_connect(&locations[0]).await.unwrap();
        let b = pool.get_or_connect(&locations[0]).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.connection_count(), 1);

        pool.get_or_connect(&locations[1]).await.unwrap();
        assert_eq!(pool.connection_count(), 2);

        pool.evict(&locations[0]);
        assert_eq!(pool.connection_count(), 1);

        pool.close_all();
        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_server_fails() {
        let pool = ConnectionPool::new(Arc::new(MemoryConnector::with_servers(1)));
        let err = pool
            .get_or_connect(&ServerLocation::new("nowhere", 1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::rpc::RpcError::Transport(_)));
    }
}
