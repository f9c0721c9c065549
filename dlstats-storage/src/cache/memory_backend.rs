//! In-process cache backend.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dlstats_core::CacheError;

use super::traits::{CacheBackend, CacheResult, CacheStats, CachedEntry};

/// `HashMap`-backed cache shared between threads.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, CachedEntry>>,
    stats: RwLock<CacheStats>,
}

impl InMemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, live or expired.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }

    fn sync_sizes(&self, entries: &HashMap<String, CachedEntry>, evicted: u64) {
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = entries.len() as u64;
            stats.memory_bytes = entries
                .iter()
                .map(|(k, v)| (k.len() + v.bytes.len()) as u64)
                .sum();
            stats.evictions += evicted;
        }
    }
}

fn poisoned() -> CacheError {
    CacheError::Backend {
        reason: "in-memory cache lock poisoned".to_string(),
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let entry = entries.get(key).cloned();
        self.record(entry.is_some());
        Ok(entry)
    }

    fn put(&self, key: &str, bytes: &[u8], cached_at: DateTime<Utc>) -> CacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(
            key.to_string(),
            CachedEntry {
                bytes: bytes.to_vec(),
                cached_at,
            },
        );
        self.sync_sizes(&entries, 0);
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let removed = entries.remove(key).is_some();
        self.sync_sizes(&entries, 0);
        Ok(removed)
    }

    fn prune(&self, cached_before: DateTime<Utc>) -> CacheResult<u64> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.cached_at >= cached_before);
        let evicted = (before - entries.len()) as u64;
        self.sync_sizes(&entries, evicted);
        Ok(evicted)
    }

    fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}
