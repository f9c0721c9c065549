//! Cache backend trait and statistics.
//!
//! Backends store opaque bytes under string keys together with the instant
//! they were written. Expiry is decided by the read-through layer, not by the
//! backend.

use chrono::{DateTime, Utc};
use dlstats_core::CacheError;

/// Result type for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// A stored cache value and the time it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedEntry {
    pub bytes: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over different backends (in-memory, LMDB, a host
/// object cache). Implementations must be safe to share between threads.
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache.
    ///
    /// Returns the stored bytes and when they were cached, or None if absent.
    fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>>;

    /// Put a value into the cache, replacing any previous value.
    fn put(&self, key: &str, bytes: &[u8], cached_at: DateTime<Utc>) -> CacheResult<()>;

    /// Delete a value. Returns true if something was removed.
    fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every entry cached strictly before `cached_before`.
    fn prune(&self, cached_before: DateTime<Utc>) -> CacheResult<u64>;

    /// Get cache statistics.
    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of entries removed by pruning.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
