//! Chunk location resolver
//!
//! Translates a byte range of a file into the chunk slots covering it and
//! the servers holding each slot. Slot assignments come from the metadata
//! server and are cached per `(path, file_id, mtime)`; any mutation this
//! client makes through [`crate::metadata::MetadataOps`] or an output
//! channel invalidates the affected paths.

use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;

use crate::cache::{CachePolicy, LocationCache, LocationEntry};
use crate::data::chunking::StripeMapper;
use crate::error::{AccessError, AccessResult};
use crate::metadata::path;
use crate::metadata::types::FileAttr;
use crate::rpc::{ChunkSlot, MetaServerClient, ServerLocation};
use crate::stats::{ClientStats, Counter};

/// Where one chunk (or stripe chunk) of a file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkLocation {
    pub slot: u64,
    /// Stripe within the block, `None` for replicated files
    pub stripe_index: Option<u32>,
    /// First file byte of the range that falls into this chunk
    pub file_offset: u64,
    /// Replicas in server order; empty for a hole
    pub servers: Vec<ServerLocation>,
    /// Addressing unit: `CHUNK_SIZE`, or `CHUNK_SIZE * num_stripes` if striped
    pub block_size: u64,
}

impl ChunkLocation {
    /// `host:port` strings of the replicas
    pub fn server_names(&self) -> Vec<String> {
        self.servers.iter().map(|s| s.to_string()).collect()
    }
}

pub struct ChunkLocationResolver {
    meta: Arc<dyn MetaServerClient>,
    cache: LocationCache,
    stats: Arc<ClientStats>,
}

impl ChunkLocationResolver {
    pub fn new(meta: Arc<dyn MetaServerClient>, policy: CachePolicy, stats: Arc<ClientStats>) -> Self {
        Self {
            meta,
            cache: LocationCache::new(policy),
            stats,
        }
    }

    async fn lookup_file(&self, path: &str) -> AccessResult<FileAttr> {
        self.stats.incr(Counter::MetaOps);
        let attr = self
            .meta
            .lookup(path)
            .await
            .map_err(|e| AccessError::from_rpc(e, path))?;
        if attr.is_directory {
            return Err(AccessError::NotAFile(path.to_string()));
        }
        Ok(attr)
    }

    /// Chunks covering `[offset, offset + length)`, in file order
    ///
    /// The range is clipped to the file size. Each slot appears once, at
    /// the position of the first byte of the range it holds.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> AccessResult<Vec<ChunkLocation>> {
        let path = path::normalize(path)?;
        let attr = self.lookup_file(&path).await?;
        self.resolve_attr(&path, &attr, offset, length).await
    }

    /// [`resolve`](Self::resolve) against an attribute snapshot
    pub async fn resolve_attr(
        &self,
        path: &str,
        attr: &FileAttr,
        offset: u64,
        length: u64,
    ) -> AccessResult<Vec<ChunkLocation>> {
        let end = offset.saturating_add(length).min(attr.filesize);
        if offset >= end {
            return Ok(Vec::new());
        }

        let mapper = StripeMapper::new(&attr.layout);
        let entry = self
            .slots(path, attr, mapper.slot_range(offset, end - offset))
            .await?;

        let mut seen = BTreeSet::new();
        let locations = mapper
            .map_range(offset, end - offset)
            .into_iter()
            .filter(|piece| seen.insert(piece.slot))
            .map(|piece| ChunkLocation {
                slot: piece.slot,
                stripe_index: piece.stripe_index,
                file_offset: piece.file_offset,
                servers: servers_of(&entry, piece.slot),
                block_size: mapper.block_size(),
            })
            .collect();
        Ok(locations)
    }

    /// Block size plus every slot of every block the range touches
    ///
    /// Recovery slots of striped files are included, after the data slots of
    /// their block.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn resolve_blocks(
        &self,
        path: &str,
        offset: u64,
        length: u64,
    ) -> AccessResult<(u64, Vec<ChunkLocation>)> {
        let path = path::normalize(path)?;
        let attr = self.lookup_file(&path).await?;
        let mapper = StripeMapper::new(&attr.layout);
        let block_size = mapper.block_size();

        // Clip to EOF, but always report the block holding `offset`
        let end = offset.saturating_add(length).min(attr.filesize);
        let slots = mapper.slot_range(offset, end.saturating_sub(offset).max(1));
        let entry = self.slots(&path, &attr, slots.clone()).await?;

        let spb = mapper.slots_per_block();
        let num_stripes = attr.layout.num_stripes as u64;
        let rows = slots
            .map(|slot| {
                let block = slot / spb;
                let index = slot % spb;
                ChunkLocation {
                    slot,
                    stripe_index: attr.layout.is_striped().then_some(index as u32),
                    file_offset: (block * block_size).saturating_add(
                        if index < num_stripes.max(1) {
                            index * attr.layout.stripe_size
                        } else {
                            0
                        },
                    ),
                    servers: servers_of(&entry, slot),
                    block_size,
                }
            })
            .collect();
        Ok((block_size, rows))
    }

    /// Cached slot table of `path`, fetching whatever part of `range` is not
    /// known yet
    pub(crate) async fn slots(
        &self,
        path: &str,
        attr: &FileAttr,
        range: Range<u64>,
    ) -> AccessResult<Arc<LocationEntry>> {
        let generation = attr.modification_time;
        let cached = self.cache.get(path, attr.file_id, generation);

        let missing: Vec<u64> = range
            .clone()
            .filter(|s| {
                cached
                    .as_ref()
                    .map_or(true, |entry| !entry.slots.contains_key(s))
            })
            .collect();

        let (first, last) = match (missing.first(), missing.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => {
                self.stats.incr(Counter::LocationCacheHits);
                tracing::trace!("location cache hit: {} slots {:?}", path, range);
                // Every slot of a non-empty range was found, so the entry exists
                if let Some(entry) = cached {
                    return Ok(entry);
                }
                return Ok(Arc::new(LocationEntry::new(
                    attr.file_id,
                    generation,
                    attr.layout,
                )));
            }
        };

        self.stats.incr(Counter::LocationCacheMisses);
        self.stats.incr(Counter::MetaOps);
        let fetched = self
            .meta
            .get_chunk_slots(attr.file_id, first, last - first + 1)
            .await
            .map_err(|e| AccessError::from_rpc(e, path))?;
        tracing::debug!(
            "fetched {} allocated slots of {} in {}..={}",
            fetched.len(),
            path,
            first,
            last
        );

        Ok(self
            .cache
            .update(path, attr.file_id, generation, attr.layout, |entry| {
                for s in first..=last {
                    entry.slots.entry(s).or_insert(None);
                }
                for slot in fetched {
                    let s = slot.slot;
                    entry.slots.insert(s, Some(slot));
                }
            }))
    }

    /// Allocated slot `slot` of the file, allocating it if needed
    pub(crate) async fn allocate(
        &self,
        path: &str,
        attr: &FileAttr,
        slot: u64,
    ) -> AccessResult<ChunkSlot> {
        if let Some(entry) = self.cache.get(path, attr.file_id, attr.modification_time) {
            if let Some(Some(known)) = entry.slots.get(&slot) {
                self.stats.incr(Counter::LocationCacheHits);
                return Ok(known.clone());
            }
        }

        self.stats.incr(Counter::MetaOps);
        let allocated = self
            .meta
            .allocate_chunk(attr.file_id, slot)
            .await
            .map_err(|e| AccessError::from_rpc(e, path))?;
        tracing::debug!(
            "allocated slot {} of {} on {:?}",
            slot,
            path,
            allocated.servers
        );

        self.cache.update(
            path,
            attr.file_id,
            attr.modification_time,
            attr.layout,
            |entry| {
                entry.slots.insert(slot, Some(allocated.clone()));
            },
        );
        Ok(allocated)
    }

    /// Forget cached locations of `path`
    pub fn invalidate(&self, path: &str) {
        self.cache.invalidate(path);
    }

    /// Forget cached locations of `path` and everything below it
    pub fn invalidate_tree(&self, path: &str) {
        self.cache.invalidate_prefix(path);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cached_paths(&self) -> usize {
        self.cache.len()
    }
}

fn servers_of(entry: &LocationEntry, slot: u64) -> Vec<ServerLocation> {
    match entry.slots.get(&slot) {
        Some(Some(known)) => known.servers.clone(),
        _ => Vec::new(),
    }
}
