use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::constants::{CHUNK_SIZE, MAX_TRANSFER_SIZE};
use crate::error::errno;
use crate::rpc::{
    ChunkHandle, ChunkServerClient, ChunkServerConnector, RpcError, RpcResult, ServerLocation,
};

/// Chunk contents on one server
///
/// Writes are staged until the chunk is synced; readers only see committed
/// bytes.
#[derive(Debug, Default)]
struct StoredChunk {
    committed: Vec<u8>,
    staged: Vec<(u64, Bytes)>,
}

impl StoredChunk {
    fn commit(&mut self) {
        for (offset, data) in self.staged.drain(..) {
            let offset = offset as usize;
            let end = offset + data.len();
            if self.committed.len() < end {
                self.committed.resize(end, 0);
            }
            self.committed[offset..end].copy_from_slice(&data);
        }
    }
}

/// In-memory chunk server
///
/// Stores chunk bytes keyed by chunk id. `set_down` and `fail_next_writes`
/// inject transport faults.
pub struct MemoryChunkServer {
    location: ServerLocation,
    chunks: Mutex<HashMap<i64, StoredChunk>>,
    down: AtomicBool,
    failing_writes: AtomicUsize,
    reads: AtomicU64,
    bytes_served: AtomicU64,
}

impl MemoryChunkServer {
    pub fn new(location: ServerLocation) -> Self {
        Self {
            location,
            chunks: Mutex::new(HashMap::new()),
            down: AtomicBool::new(false),
            failing_writes: AtomicUsize::new(0),
            reads: AtomicU64::new(0),
            bytes_served: AtomicU64::new(0),
        }
    }

    /// Refuse every request while `down` is set
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::SeqCst)
    }

    /// Fail the next `count` writes with a transport error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Read requests served so far
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn bytes_served(&self) -> u64 {
        self.bytes_served.load(Ordering::Relaxed)
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Committed length of a chunk, `None` if the chunk is unknown
    pub fn chunk_len(&self, chunk_id: i64) -> Option<usize> {
        self.chunks.lock().get(&chunk_id).map(|c| c.committed.len())
    }

    /// Cut a chunk to `len` bytes
    pub fn truncate_chunk(&self, chunk_id: i64, len: usize) {
        if let Some(chunk) = self.chunks.lock().get_mut(&chunk_id) {
            chunk.commit();
            chunk.committed.truncate(len);
            tracing::debug!(
                "{}: truncated chunk {} to {} bytes",
                self.location,
                chunk_id,
                len
            );
        }
    }

    pub fn delete_chunk(&self, chunk_id: i64) {
        if self.chunks.lock().remove(&chunk_id).is_some() {
            tracing::debug!("{}: deleted chunk {}", self.location, chunk_id);
        }
    }

    fn check_up(&self) -> RpcResult<()> {
        if self.is_down() {
            return Err(RpcError::Transport(format!(
                "connection to {} refused",
                self.location
            )));
        }
        Ok(())
    }

    fn take_write_fault(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChunkServerClient for MemoryChunkServer {
    fn location(&self) -> &ServerLocation {
        &self.location
    }

    #[tracing::instrument(level = "trace", skip(self), fields(server = %self.location))]
    async fn read(&self, chunk: ChunkHandle, offset: u64, len: usize) -> RpcResult<Bytes> {
        self.check_up()?;
        if offset >= CHUNK_SIZE || len > MAX_TRANSFER_SIZE {
            return Err(RpcError::Status(errno::EINVAL));
        }
        self.reads.fetch_add(1, Ordering::Relaxed);

        let chunks = self.chunks.lock();
        let Some(stored) = chunks.get(&chunk.chunk_id) else {
            return Ok(Bytes::new());
        };
        let start = (offset as usize).min(stored.committed.len());
        let end = (offset as usize + len).min(stored.committed.len());
        let data = Bytes::copy_from_slice(&stored.committed[start..end]);
        self.bytes_served
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(data)
    }

    #[tracing::instrument(level = "trace", skip(self, data), fields(server = %self.location, len = data.len()))]
    async fn write(&self, chunk: ChunkHandle, offset: u64, data: Bytes) -> RpcResult<usize> {
        self.check_up()?;
        if self.take_write_fault() {
            return Err(RpcError::Transport(format!(
                "write to {} interrupted",
                self.location
            )));
        }
        if data.len() > MAX_TRANSFER_SIZE || offset + data.len() as u64 > CHUNK_SIZE {
            return Err(RpcError::Status(errno::EINVAL));
        }

        let len = data.len();
        self.chunks
            .lock()
            .entry(chunk.chunk_id)
            .or_default()
            .staged
            .push((offset, data));
        Ok(len)
    }

    async fn sync(&self, chunk: ChunkHandle) -> RpcResult<()> {
        self.check_up()?;
        if let Some(stored) = self.chunks.lock().get_mut(&chunk.chunk_id) {
            stored.commit();
        }
        Ok(())
    }
}

/// Connects to a fixed set of in-memory chunk servers
pub struct MemoryConnector {
    servers: HashMap<ServerLocation, Arc<MemoryChunkServer>>,
    order: Vec<ServerLocation>,
}

impl MemoryConnector {
    pub fn new(servers: Vec<Arc<MemoryChunkServer>>) -> Self {
        let order: Vec<ServerLocation> = servers.iter().map(|s| s.location.clone()).collect();
        let servers = servers
            .into_iter()
            .map(|s| (s.location.clone(), s))
            .collect();
        Self { servers, order }
    }

    /// `count` servers on 127.0.0.1, ports from 22000
    pub fn with_servers(count: u16) -> Self {
        Self::new(
            (0..count)
                .map(|i| Arc::new(MemoryChunkServer::new(ServerLocation::new("127.0.0.1", 22000 + i))))
                .collect(),
        )
    }

    pub fn locations(&self) -> Vec<ServerLocation> {
        self.order.clone()
    }

    pub fn server(&self, index: usize) -> Option<Arc<MemoryChunkServer>> {
        self.order
            .get(index)
            .and_then(|loc| self.servers.get(loc))
            .cloned()
    }

    pub fn servers(&self) -> Vec<Arc<MemoryChunkServer>> {
        self.order
            .iter()
            .filter_map(|loc| self.servers.get(loc).cloned())
            .collect()
    }
}

#[async_trait]
impl ChunkServerConnector for MemoryConnector {
    async fn connect(&self, location: &ServerLocation) -> RpcResult<Arc<dyn ChunkServerClient>> {
        let server = self
            .servers
            .get(location)
            .ok_or_else(|| RpcError::Transport(format!("unknown chunk server {}", location)))?;
        server.check_up()?;
        Ok(server.clone())
    }
}
