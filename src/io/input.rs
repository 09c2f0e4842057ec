//! Input channel with read-ahead

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::constants::MAX_TRANSFER_SIZE;
use crate::error::{AccessError, AccessResult};
use crate::io::data_path::ChunkIo;
use crate::metadata::types::FileAttr;
use crate::stats::{ClientStats, Counter};

/// Background fetch of `[start, start + len)`
struct Prefetch {
    start: u64,
    len: u64,
    handle: JoinHandle<AccessResult<Bytes>>,
}

impl Prefetch {
    fn covers(&self, pos: u64) -> bool {
        pos >= self.start && pos < self.start + self.len
    }
}

/// Sequential reader over one file
///
/// With a non-zero read-ahead size the channel keeps a buffer ahead of the
/// cursor and refills it in the background once less than half of a
/// read-ahead window remains. With read-ahead 0 every `read` asks the chunk
/// servers for exactly the bytes it returns.
///
/// The file size is taken from the attribute snapshot made at open.
pub struct InputChannel {
    path: String,
    attr: FileAttr,
    io: Arc<ChunkIo>,
    stats: Arc<ClientStats>,
    pos: u64,
    buffer: Bytes,
    /// File offset of `buffer[0]`
    buffer_start: u64,
    pending: Option<Prefetch>,
    read_ahead: usize,
    closed: bool,
}

impl InputChannel {
    pub(crate) fn new(
        path: String,
        attr: FileAttr,
        read_ahead: usize,
        io: Arc<ChunkIo>,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            path,
            attr,
            io,
            stats,
            pos: 0,
            buffer: Bytes::new(),
            buffer_start: 0,
            pending: None,
            read_ahead,
            closed: false,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attr(&self) -> &FileAttr {
        &self.attr
    }

    pub fn filesize(&self) -> u64 {
        self.attr.filesize
    }

    /// Logical read position, independent of how much is buffered
    pub fn tell(&self) -> u64 {
        self.pos
    }

    pub fn read_ahead_size(&self) -> usize {
        self.read_ahead
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> AccessResult<()> {
        if self.closed {
            return Err(AccessError::ClosedChannel);
        }
        Ok(())
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    fn buffer_covers(&self, pos: u64) -> bool {
        pos >= self.buffer_start && pos < self.buffer_end()
    }

    /// Change the read-ahead size; 0 drops the buffer and any pending fetch
    pub fn set_read_ahead_size(&mut self, size: usize) {
        self.read_ahead = size;
        if size == 0 {
            self.buffer = Bytes::new();
            self.discard_prefetch();
        }
    }

    fn discard_prefetch(&mut self) {
        if let Some(prefetch) = self.pending.take() {
            prefetch.handle.abort();
            self.stats.incr(Counter::PrefetchDiscarded);
            tracing::trace!(
                "{}: discarded prefetch of {}+{}",
                self.path,
                prefetch.start,
                prefetch.len
            );
        }
    }

    /// Read into `buf` from the current position
    ///
    /// Returns `min(buf.len(), filesize - position)` bytes; 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> AccessResult<usize> {
        self.ensure_open()?;
        let want = (buf.len() as u64).min(self.attr.filesize.saturating_sub(self.pos)) as usize;
        if want == 0 {
            return Ok(0);
        }

        if self.read_ahead == 0 {
            let data = self
                .io
                .read_range(&self.path, &self.attr, self.pos, want as u64)
                .await?;
            buf[..data.len()].copy_from_slice(&data);
            self.pos += data.len() as u64;
            return Ok(data.len());
        }

        let mut filled = 0;
        while filled < want {
            if self.buffer_covers(self.pos) {
                let from = (self.pos - self.buffer_start) as usize;
                let n = (self.buffer.len() - from).min(want - filled);
                buf[filled..filled + n].copy_from_slice(&self.buffer[from..from + n]);
                filled += n;
                self.pos += n as u64;
                continue;
            }

            if self.take_prefetch().await {
                continue;
            }

            let len = ((want - filled) as u64)
                .max(self.read_ahead as u64)
                .min(MAX_TRANSFER_SIZE as u64);
            let data = self
                .io
                .read_range(&self.path, &self.attr, self.pos, len)
                .await?;
            if data.is_empty() {
                break;
            }
            self.buffer_start = self.pos;
            self.buffer = data;
        }

        self.maybe_prefetch();
        Ok(filled)
    }

    /// Install the pending prefetch as the buffer if it covers the position
    ///
    /// Returns false when there is nothing usable; a failed prefetch only
    /// costs the synchronous fetch that replaces it.
    async fn take_prefetch(&mut self) -> bool {
        match &self.pending {
            Some(prefetch) if prefetch.covers(self.pos) => {}
            Some(_) => {
                self.discard_prefetch();
                return false;
            }
            None => return false,
        }
        let Some(prefetch) = self.pending.take() else {
            return false;
        };

        match prefetch.handle.await {
            Ok(Ok(data)) if !data.is_empty() => {
                self.stats.incr(Counter::PrefetchUsed);
                self.buffer_start = prefetch.start;
                self.buffer = data;
                true
            }
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                self.stats.incr(Counter::PrefetchFailed);
                tracing::debug!(
                    "{}: prefetch of {}+{} failed: {}",
                    self.path,
                    prefetch.start,
                    prefetch.len,
                    e
                );
                false
            }
            Err(e) => {
                self.stats.incr(Counter::PrefetchFailed);
                tracing::debug!("{}: prefetch task ended: {}", self.path, e);
                false
            }
        }
    }

    /// Start fetching the next window when the buffer runs low
    fn maybe_prefetch(&mut self) {
        if self.read_ahead == 0 || self.pending.is_some() {
            return;
        }
        let start = if self.buffer_covers(self.pos) {
            self.buffer_end()
        } else {
            self.pos
        };
        let remaining = start - self.pos;
        if remaining >= (self.read_ahead / 2) as u64 || start >= self.attr.filesize {
            return;
        }
        let len = (self.read_ahead as u64)
            .min(self.attr.filesize - start)
            .min(MAX_TRANSFER_SIZE as u64);

        let io = self.io.clone();
        let path = self.path.clone();
        let attr = self.attr.clone();
        let handle = tokio::spawn(async move { io.read_range(&path, &attr, start, len).await });

        self.stats.incr(Counter::PrefetchIssued);
        tracing::trace!("{}: prefetch issued for {}+{}", self.path, start, len);
        self.pending = Some(Prefetch { start, len, handle });
    }

    /// Move the read position; returns the new position
    ///
    /// Buffered bytes and pending prefetches that do not cover `pos` are
    /// dropped. Seeking past the end is allowed; reads there return 0.
    pub fn seek(&mut self, pos: u64) -> AccessResult<u64> {
        self.ensure_open()?;
        if !self.buffer_covers(pos) {
            self.buffer = Bytes::new();
            self.buffer_start = pos;
        }
        if matches!(&self.pending, Some(p) if !p.covers(pos)) {
            self.discard_prefetch();
        }
        self.pos = pos;
        Ok(pos)
    }

    /// Release the buffer; closing twice is a no-op
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.discard_prefetch();
        self.buffer = Bytes::new();
    }
}

impl Drop for InputChannel {
    fn drop(&mut self) {
        if let Some(prefetch) = self.pending.take() {
            prefetch.handle.abort();
        }
    }
}
