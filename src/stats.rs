//! Per-client statistics
//!
//! Counters are plain relaxed atomics owned by one client instance. When
//! collection is disabled every `record` is a single branch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What a counter counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    MetaOps,
    ChunkReads,
    ChunkWrites,
    ChunkSyncs,
    BytesRead,
    BytesWritten,
    LocationCacheHits,
    LocationCacheMisses,
    PrefetchIssued,
    PrefetchUsed,
    PrefetchDiscarded,
    PrefetchFailed,
    TokenOps,
    ReplicaFailovers,
}

impl Counter {
    pub const ALL: [Counter; 14] = [
        Counter::MetaOps,
        Counter::ChunkReads,
        Counter::ChunkWrites,
        Counter::ChunkSyncs,
        Counter::BytesRead,
        Counter::BytesWritten,
        Counter::LocationCacheHits,
        Counter::LocationCacheMisses,
        Counter::PrefetchIssued,
        Counter::PrefetchUsed,
        Counter::PrefetchDiscarded,
        Counter::PrefetchFailed,
        Counter::TokenOps,
        Counter::ReplicaFailovers,
    ];

    /// Key used by [`ClientStats::snapshot`]
    pub fn name(self) -> &'static str {
        match self {
            Counter::MetaOps => "meta_ops",
            Counter::ChunkReads => "chunk_reads",
            Counter::ChunkWrites => "chunk_writes",
            Counter::ChunkSyncs => "chunk_syncs",
            Counter::BytesRead => "bytes_read",
            Counter::BytesWritten => "bytes_written",
            Counter::LocationCacheHits => "location_cache_hits",
            Counter::LocationCacheMisses => "location_cache_misses",
            Counter::PrefetchIssued => "prefetch_issued",
            Counter::PrefetchUsed => "prefetch_used",
            Counter::PrefetchDiscarded => "prefetch_discarded",
            Counter::PrefetchFailed => "prefetch_failed",
            Counter::TokenOps => "token_ops",
            Counter::ReplicaFailovers => "replica_failovers",
        }
    }
}

/// Counters of one client instance
#[derive(Debug)]
pub struct ClientStats {
    enabled: AtomicBool,
    counters: [AtomicU64; Counter::ALL.len()],
}

impl ClientStats {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            counters: Default::default(),
        }
    }

    /// Enable or disable collection
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record(&self, counter: Counter, amount: u64) {
        if self.is_enabled() {
            self.counters[counter as usize].fetch_add(amount, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn incr(&self, counter: Counter) {
        self.record(counter, 1);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    /// Every counter as decimal strings, plus `stats_enabled`
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = Counter::ALL
            .iter()
            .map(|&c| (c.name().to_string(), self.get(c).to_string()))
            .collect();
        map.insert("stats_enabled".to_string(), self.is_enabled().to_string());
        map
    }
}

impl Default for ClientStats {
    fn default() -> Self {
        Self::new(true)
    }
}
