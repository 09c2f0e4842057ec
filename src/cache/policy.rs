//! Cache policies

use std::time::Duration;

use crate::config::CacheConfig;

/// Cache policy configuration
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Time-to-live for cache entries
    pub ttl: Option<Duration>,

    /// Number of independently locked shards (power of two)
    pub shards: usize,
}

impl CachePolicy {
    /// Create a new cache policy with LRU eviction
    pub fn lru(max_entries: usize) -> Self {
        Self {
            max_entries,
            ttl: None,
            shards: 1,
        }
    }

    /// Create a new cache policy with LRU eviction and TTL
    pub fn lru_with_ttl(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl: Some(ttl),
            shards: 1,
        }
    }

    /// Split the cache into `shards` shards (rounded up to a power of two)
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1).next_power_of_two();
        self
    }

    /// Entries each shard may hold
    pub fn entries_per_shard(&self) -> usize {
        (self.max_entries / self.shards).max(1)
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let policy = if config.cache_ttl_secs > 0 {
            Self::lru_with_ttl(
                config.location_cache_entries,
                Duration::from_secs(config.cache_ttl_secs),
            )
        } else {
            Self::lru(config.location_cache_entries)
        };
        policy.with_shards(config.location_cache_shards)
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::lru(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.max_entries, 1000);
        assert_eq!(policy.shards, 1);
        assert!(policy.ttl.is_none());
    }

    #[test]
    fn test_lru_with_ttl() {
        let ttl = Duration::from_secs(60);
        let policy = CachePolicy::lru_with_ttl(500, ttl);
        assert_eq!(policy.max_entries, 500);
        assert_eq!(policy.ttl, Some(ttl));
    }

    #[test]
    fn test_shards() {
        let policy = CachePolicy::lru(100).with_shards(6);
        assert_eq!(policy.shards, 8);
        assert_eq!(policy.entries_per_shard(), 12);

        let policy = CachePolicy::lru(2).with_shards(16);
        assert_eq!(policy.entries_per_shard(), 1);
    }

    #[test]
    fn test_from_config() {
        let mut config = CacheConfig::default();
        let policy = CachePolicy::from_config(&config);
        assert!(policy.ttl.is_none());
        assert_eq!(policy.shards, config.location_cache_shards);

        config.cache_ttl_secs = 30;
        let policy = CachePolicy::from_config(&config);
        assert_eq!(policy.ttl, Some(Duration::from_secs(30)));
    }
}
