//! Buffered output channel
//!
//! Striped files get their data stripes written; recovery slots are
//! allocated but left empty.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::BytesMut;

use crate::error::{AccessError, AccessResult};
use crate::io::data_path::ChunkIo;
use crate::metadata::types::FileAttr;
use crate::rpc::{ChunkSlot, MetaServerClient};
use crate::stats::{ClientStats, Counter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    Open,
    /// Bytes were written since the last sync
    Writing,
    Closed,
}

/// Buffered writer over one file
///
/// Bytes accumulate in a private buffer and go to the chunk servers when
/// the buffer fills, on [`sync`](Self::sync) and on [`close`](Self::close).
/// A channel is used by one task at a time; distinct channels over the same
/// file are independent.
pub struct OutputChannel {
    path: String,
    attr: FileAttr,
    io: Arc<ChunkIo>,
    meta: Arc<dyn MetaServerClient>,
    stats: Arc<ClientStats>,
    buffer: BytesMut,
    capacity: usize,
    /// File offset of `buffer[0]`
    buffer_offset: u64,
    /// Slots written since the last sync
    dirty: BTreeMap<u64, ChunkSlot>,
    /// End of the furthest byte handed to the chunk servers
    high_water: u64,
    size_dirty: bool,
    state: OutputState,
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("path", &self.path)
            .field("attr", &self.attr)
            .field("capacity", &self.capacity)
            .field("buffer_offset", &self.buffer_offset)
            .field("buffered", &self.buffer.len())
            .field("high_water", &self.high_water)
            .field("size_dirty", &self.size_dirty)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl OutputChannel {
    pub(crate) fn new(
        path: String,
        attr: FileAttr,
        start: u64,
        capacity: usize,
        io: Arc<ChunkIo>,
        meta: Arc<dyn MetaServerClient>,
        stats: Arc<ClientStats>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            path,
            attr,
            io,
            meta,
            stats,
            buffer: BytesMut::with_capacity(capacity),
            capacity,
            buffer_offset: start,
            dirty: BTreeMap::new(),
            high_water: 0,
            size_dirty: false,
            state: OutputState::Open,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn state(&self) -> OutputState {
        self.state
    }

    /// Attributes of the file when the channel was opened
    pub fn attr(&self) -> &FileAttr {
        &self.attr
    }

    /// Logical write position
    pub fn tell(&self) -> u64 {
        self.buffer_offset + self.buffer.len() as u64
    }

    /// Bytes buffered but not yet sent
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn ensure_open(&self) -> AccessResult<()> {
        if self.state == OutputState::Closed {
            return Err(AccessError::ClosedChannel);
        }
        Ok(())
    }

    /// Append `data` at the write position
    ///
    /// Returns fewer bytes than `data.len()` only when a buffer flush hit a
    /// transport fault after part of `data` had been taken; the unsent bytes
    /// stay buffered for the next `write`, `sync` or `close`.
    pub async fn write(&mut self, data: &[u8]) -> AccessResult<usize> {
        self.ensure_open()?;
        if data.is_empty() {
            return Ok(0);
        }
        self.state = OutputState::Writing;

        let mut written = 0;
        while written < data.len() {
            if self.buffer.len() >= self.capacity {
                match self.flush_buffer().await {
                    Ok(()) => {}
                    Err(e) if e.is_transport() && written > 0 => {
                        tracing::warn!(
                            "{}: short write, {} of {} bytes taken: {}",
                            self.path,
                            written,
                            data.len(),
                            e
                        );
                        return Ok(written);
                    }
                    Err(e) => return Err(e),
                }
            }
            let take = (self.capacity - self.buffer.len()).min(data.len() - written);
            self.buffer.extend_from_slice(&data[written..written + take]);
            written += take;
        }
        Ok(written)
    }

    /// Send the buffer to the chunk servers
    async fn flush_buffer(&mut self) -> AccessResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let pending = self.buffer.split().freeze();
        let len = pending.len() as u64;

        let outcome = match self
            .io
            .write_range(&self.path, &self.attr, self.buffer_offset, pending.clone())
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.buffer.extend_from_slice(&pending);
                return Err(e);
            }
        };

        for slot in outcome.dirty {
            self.dirty.insert(slot.slot, slot);
        }
        if outcome.accepted > 0 {
            self.buffer_offset += outcome.accepted;
            self.high_water = self.high_water.max(self.buffer_offset);
            self.size_dirty = true;
        }
        tracing::debug!(
            "{}: flushed {} of {} bytes, now at {}",
            self.path,
            outcome.accepted,
            len,
            self.buffer_offset
        );

        match outcome.fault {
            None => Ok(()),
            Some(fault) => {
                self.buffer
                    .extend_from_slice(&pending[outcome.accepted as usize..]);
                Err(fault)
            }
        }
    }

    /// Flush the buffer and wait until the chunk servers made every written
    /// byte durable, then publish the new file size
    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub async fn sync(&mut self) -> AccessResult<()> {
        self.ensure_open()?;
        self.flush_buffer().await?;

        if !self.dirty.is_empty() {
            let slots: Vec<ChunkSlot> = self.dirty.values().cloned().collect();
            self.io.sync_slots(&self.path, &slots).await?;
            self.dirty.clear();
        }

        if self.size_dirty {
            self.stats.incr(Counter::MetaOps);
            self.meta
                .extend_size(self.attr.file_id, self.high_water)
                .await
                .map_err(|e| AccessError::from_rpc(e, &self.path))?;
            self.size_dirty = false;
            self.io.resolver().invalidate(&self.path);
        }

        self.state = OutputState::Open;
        Ok(())
    }

    /// Sync and close; closing a closed channel does nothing
    ///
    /// The channel is closed even when the final sync fails; the failure is
    /// returned and the unsynced bytes are lost.
    pub async fn close(&mut self) -> AccessResult<()> {
        if self.state == OutputState::Closed {
            return Ok(());
        }
        let result = self.sync().await;
        self.state = OutputState::Closed;
        self.buffer.clear();
        self.dirty.clear();
        if let Err(e) = &result {
            tracing::warn!("{}: close failed: {}", self.path, e);
        }
        result
    }
}

impl Drop for OutputChannel {
    fn drop(&mut self) {
        if self.state != OutputState::Closed && (!self.buffer.is_empty() || !self.dirty.is_empty()) {
            tracing::warn!(
                "{}: output channel dropped without close, {} buffered bytes discarded",
                self.path,
                self.buffer.len()
            );
        }
    }
}
