//! Chunk location cache
//!
//! Maps a path to what this client knows about the file's chunk slots. An
//! entry is valid only for the `(file_id, generation)` it was built for;
//! lookups with any other pair miss. Entries are immutable once published:
//! updates clone, modify and replace under the shard lock, so a reader
//! holding an `Arc<LocationEntry>` never observes a half-applied change.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use xxhash_rust::xxh64::xxh64;

use crate::cache::policy::CachePolicy;
use crate::data::layout::StripeLayout;
use crate::rpc::ChunkSlot;

/// Cache entry with timestamp for TTL support
#[derive(Clone)]
struct CacheEntry<T> {
    data: T,
    timestamp: Instant,
}

impl<T> CacheEntry<T> {
    fn new(data: T) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.timestamp.elapsed() > ttl
    }
}

/// Known chunk slots of one file generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEntry {
    pub file_id: i64,
    /// Modification time the slots were fetched at
    pub generation: i64,
    pub layout: StripeLayout,
    /// `None` records a slot the server reported as unallocated
    pub slots: BTreeMap<u64, Option<ChunkSlot>>,
}

impl LocationEntry {
    pub fn new(file_id: i64, generation: i64, layout: StripeLayout) -> Self {
        Self {
            file_id,
            generation,
            layout,
            slots: BTreeMap::new(),
        }
    }

    pub fn matches(&self, file_id: i64, generation: i64) -> bool {
        self.file_id == file_id && self.generation == generation
    }
}

type Shard = Mutex<LruCache<String, CacheEntry<Arc<LocationEntry>>>>;

/// Sharded LRU cache of [`LocationEntry`] values keyed by path
pub struct LocationCache {
    shards: Vec<Shard>,
    policy: CachePolicy,
}

impl LocationCache {
    /// Create a new location cache with the given policy
    pub fn new(policy: CachePolicy) -> Self {
        let per_shard = NonZeroUsize::new(policy.entries_per_shard()).unwrap_or(NonZeroUsize::MIN);
        let shards = (0..policy.shards.max(1))
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect();
        Self { shards, policy }
    }

    /// Create a new location cache with default policy
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(CachePolicy::lru(capacity))
    }

    fn shard(&self, path: &str) -> &Shard {
        let index = xxh64(path.as_bytes(), 0) as usize & (self.shards.len() - 1);
        &self.shards[index]
    }

    /// Entry for `path` if it was built for `(file_id, generation)`
    pub fn get(&self, path: &str, file_id: i64, generation: i64) -> Option<Arc<LocationEntry>> {
        let mut cache = self.shard(path).lock();

        let entry = cache.get(path)?;
        if let Some(ttl) = self.policy.ttl {
            if entry.is_expired(ttl) {
                cache.pop(path);
                return None;
            }
        }
        if !entry.data.matches(file_id, generation) {
            return None;
        }
        Some(entry.data.clone())
    }

    pub fn put(&self, path: &str, entry: Arc<LocationEntry>) {
        self.shard(path)
            .lock()
            .put(path.to_string(), CacheEntry::new(entry));
    }

    /// Replace the entry for `path` with a modified copy
    ///
    /// Starts from an empty entry when the cached one belongs to another
    /// file or generation. Returns the published entry.
    pub fn update<F>(
        &self,
        path: &str,
        file_id: i64,
        generation: i64,
        layout: StripeLayout,
        f: F,
    ) -> Arc<LocationEntry>
    where
        F: FnOnce(&mut LocationEntry),
    {
        let mut cache = self.shard(path).lock();
        let mut entry = match cache.get(path) {
            Some(cached) if cached.data.matches(file_id, generation) => (*cached.data).clone(),
            _ => LocationEntry::new(file_id, generation, layout),
        };
        f(&mut entry);
        let entry = Arc::new(entry);
        cache.put(path.to_string(), CacheEntry::new(entry.clone()));
        entry
    }

    /// Invalidate the entry for `path`
    pub fn invalidate(&self, path: &str) {
        if self.shard(path).lock().pop(path).is_some() {
            tracing::debug!("location cache: invalidated {}", path);
        }
    }

    /// Invalidate `prefix` and every path below it
    pub fn invalidate_prefix(&self, prefix: &str) {
        let dir = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        let mut removed = 0usize;
        for shard in &self.shards {
            let mut cache = shard.lock();
            let doomed: Vec<String> = cache
                .iter()
                .map(|(k, _)| k)
                .filter(|k| k.as_str() == prefix || k.starts_with(&dir))
                .cloned()
                .collect();
            for key in doomed {
                cache.pop(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("location cache: invalidated {} entries under {}", removed, prefix);
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
