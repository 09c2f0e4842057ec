//! Chunk-level read and write path shared by the channels

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::data::chunking::{ChunkPiece, StripeMapper};
use crate::error::{errno, AccessError, AccessResult};
use crate::locate::ChunkLocationResolver;
use crate::metadata::types::FileAttr;
use crate::rpc::{ChunkSlot, ConnectionPool, RpcError};
use crate::stats::{ClientStats, Counter};

/// Result of writing a range
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    /// Bytes accepted, counted from the start of the range
    pub accepted: u64,
    /// Slots that received data and need a sync
    pub dirty: Vec<ChunkSlot>,
    /// Transport fault that stopped the write after `accepted` bytes
    pub fault: Option<AccessError>,
}

pub(crate) struct ChunkIo {
    resolver: Arc<ChunkLocationResolver>,
    pool: Arc<ConnectionPool>,
    stats: Arc<ClientStats>,
    max_concurrent: usize,
}

impl ChunkIo {
    pub fn new(
        resolver: Arc<ChunkLocationResolver>,
        pool: Arc<ConnectionPool>,
        stats: Arc<ClientStats>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            resolver,
            pool,
            stats,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn resolver(&self) -> &Arc<ChunkLocationResolver> {
        &self.resolver
    }

    /// Read `[offset, offset + len)` clipped to the snapshot's file size
    ///
    /// Unallocated chunks and short chunks read as zeros.
    pub async fn read_range(
        &self,
        path: &str,
        attr: &FileAttr,
        offset: u64,
        len: u64,
    ) -> AccessResult<Bytes> {
        let end = offset.saturating_add(len).min(attr.filesize);
        if offset >= end {
            return Ok(Bytes::new());
        }

        let mapper = StripeMapper::new(&attr.layout);
        let entry = self
            .resolver
            .slots(path, attr, mapper.slot_range(offset, end - offset))
            .await?;

        let parts: Vec<Bytes> = stream::iter(mapper.map_range(offset, end - offset))
            .map(|piece| {
                let slot = entry.slots.get(&piece.slot).cloned().flatten();
                async move {
                    match slot {
                        Some(slot) => self.read_piece(path, &slot, &piece).await,
                        None => Ok(Bytes::from(vec![0u8; piece.len as usize])),
                    }
                }
            })
            .buffered(self.max_concurrent)
            .try_collect()
            .await?;

        if parts.len() == 1 {
            return Ok(parts.into_iter().next().unwrap_or_default());
        }
        let mut out = BytesMut::with_capacity((end - offset) as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out.freeze())
    }

    /// Read one piece, trying replicas in order
    async fn read_piece(&self, path: &str, slot: &ChunkSlot, piece: &ChunkPiece) -> AccessResult<Bytes> {
        let mut last_err = RpcError::Transport(format!("no replicas for slot {}", slot.slot));

        for (attempt, server) in slot.servers.iter().enumerate() {
            if attempt > 0 {
                self.stats.incr(Counter::ReplicaFailovers);
            }
            let result = match self.pool.get_or_connect(server).await {
                Ok(client) => {
                    client
                        .read(slot.handle(), piece.chunk_offset, piece.len as usize)
                        .await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(data) => {
                    self.stats.incr(Counter::ChunkReads);
                    self.stats.record(Counter::BytesRead, data.len() as u64);
                    return Ok(pad_to(data, piece.len as usize));
                }
                Err(e @ (RpcError::Transport(_) | RpcError::Timeout)) => {
                    tracing::warn!(
                        "{}: read of slot {} from {} failed ({}), trying next replica",
                        path,
                        slot.slot,
                        server,
                        e
                    );
                    self.pool.evict(server);
                    last_err = e;
                }
                Err(e) => return Err(AccessError::from_rpc(e, path)),
            }
        }
        Err(AccessError::from_rpc(last_err, path))
    }

    /// Write `data` at `offset`, allocating chunks as needed
    ///
    /// Every replica of a piece must accept it. A transport fault after some
    /// leading pieces were accepted is reported in [`WriteOutcome::fault`];
    /// any other failure, or a fault on the first piece, is an error.
    pub async fn write_range(
        &self,
        path: &str,
        attr: &FileAttr,
        offset: u64,
        data: Bytes,
    ) -> AccessResult<WriteOutcome> {
        let mapper = StripeMapper::new(&attr.layout);
        // Data stripes only. Recovery slots of a striped file are allocated
        // with their block and stay empty; no parity is computed here.
        let pieces = mapper.map_range(offset, data.len() as u64);

        let results: Vec<AccessResult<(ChunkPiece, ChunkSlot)>> = stream::iter(pieces)
            .map(|piece| {
                let start = (piece.file_offset - offset) as usize;
                let chunk = data.slice(start..start + piece.len as usize);
                async move {
                    let slot = self.resolver.allocate(path, attr, piece.slot).await?;
                    self.write_piece(path, &slot, &piece, chunk).await?;
                    Ok((piece, slot))
                }
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let mut accepted = 0;
        let mut dirty: BTreeMap<u64, ChunkSlot> = BTreeMap::new();
        let mut fault = None;
        for result in results {
            match result {
                Ok((piece, slot)) if fault.is_none() => {
                    accepted += piece.len;
                    dirty.insert(slot.slot, slot);
                }
                // Later pieces may have landed, but they are not counted
                Ok((_, slot)) => {
                    dirty.insert(slot.slot, slot);
                }
                Err(e) if e.is_transport() && accepted > 0 => {
                    if fault.is_none() {
                        fault = Some(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Ok(WriteOutcome {
            accepted,
            dirty: dirty.into_values().collect(),
            fault,
        })
    }

    async fn write_piece(
        &self,
        path: &str,
        slot: &ChunkSlot,
        piece: &ChunkPiece,
        data: Bytes,
    ) -> AccessResult<()> {
        if slot.servers.is_empty() {
            return Err(AccessError::Server {
                path: path.to_string(),
                code: errno::ENOSPC,
            });
        }
        for server in &slot.servers {
            let client = self
                .pool
                .get_or_connect(server)
                .await
                .map_err(|e| self.transport_failure(e, path, server))?;
            let written = client
                .write(slot.handle(), piece.chunk_offset, data.clone())
                .await
                .map_err(|e| self.transport_failure(e, path, server))?;
            if written != data.len() {
                return Err(AccessError::Transport {
                    path: path.to_string(),
                    reason: format!(
                        "short write to {}: {} of {} bytes",
                        server,
                        written,
                        data.len()
                    ),
                    code: errno::EIO,
                });
            }
            self.stats.incr(Counter::ChunkWrites);
        }
        self.stats.record(Counter::BytesWritten, data.len() as u64);
        Ok(())
    }

    /// Make writes to `slots` durable on every replica
    pub async fn sync_slots(&self, path: &str, slots: &[ChunkSlot]) -> AccessResult<()> {
        let targets = slots
            .iter()
            .flat_map(|slot| slot.servers.iter().map(move |server| (slot, server)));

        stream::iter(targets)
            .map(|(slot, server)| async move {
                let client = self
                    .pool
                    .get_or_connect(server)
                    .await
                    .map_err(|e| self.transport_failure(e, path, server))?;
                client
                    .sync(slot.handle())
                    .await
                    .map_err(|e| self.transport_failure(e, path, server))?;
                self.stats.incr(Counter::ChunkSyncs);
                Ok::<(), AccessError>(())
            })
            .buffer_unordered(self.max_concurrent)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    fn transport_failure(
        &self,
        err: RpcError,
        path: &str,
        server: &crate::rpc::ServerLocation,
    ) -> AccessError {
        if matches!(err, RpcError::Transport(_) | RpcError::Timeout) {
            self.pool.evict(server);
        }
        AccessError::from_rpc(err, path)
    }
}

/// Extend a short chunk reply with zeros
fn pad_to(data: Bytes, len: usize) -> Bytes {
    if data.len() >= len {
        return data.slice(..len);
    }
    let mut padded = BytesMut::with_capacity(len);
    padded.extend_from_slice(&data);
    padded.resize(len, 0);
    padded.freeze()
}
