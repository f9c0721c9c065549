//! Read-through result cache.
//!
//! Routes each cacheable query through the backend: a live entry is served
//! as-is, anything else is recomputed and written back with the current
//! instant. Backend trouble degrades to recomputation and is never surfaced
//! to the caller.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dlstats_core::{Clock, StatsConfig, StatsResult, DEFAULT_CACHE_TTL_SECS};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use super::freshness::{CacheRead, Freshness};
use super::key::CacheKey;
use super::traits::{CacheBackend, CacheStats};

/// Configuration for the read-through cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// When false every lookup recomputes and nothing is stored.
    pub enabled: bool,
    /// Lifetime of a stored entry.
    pub entry_ttl: Duration,
    /// Prefix for every encoded key.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            key_prefix: "dedo_".to_string(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the cache settings out of the statistics configuration.
    pub fn from_stats_config(config: &StatsConfig) -> Self {
        Self {
            enabled: config.cache_enabled,
            entry_ttl: config.cache_ttl,
            key_prefix: config.cache_prefix.clone(),
        }
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.entry_ttl).unwrap_or(chrono::Duration::MAX)
    }
}

/// Read-through cache over a byte-level [`CacheBackend`].
///
/// Values are stored as JSON. Freshness is judged against the injected
/// clock, so tests can move time explicitly.
///
/// # Example
///
/// ```ignore
/// let cache = ReadThroughCache::new(backend, clock, CacheConfig::default());
/// let read = cache.get_or_compute(
///     &CacheKey::download_count(0, None),
///     Freshness::Cached,
///     || storage.sum_counters(None).map(|s| s.unwrap_or(0)),
/// )?;
/// ```
pub struct ReadThroughCache<C: CacheBackend> {
    backend: Arc<C>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl<C: CacheBackend> ReadThroughCache<C> {
    pub fn new(backend: Arc<C>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            backend,
            clock,
            config,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &C {
        &self.backend
    }

    /// Backend usage counters.
    pub fn stats(&self) -> CacheStats {
        self.backend.stats()
    }

    /// Serve `key` from the cache or compute and store it.
    ///
    /// With [`Freshness::Refresh`] the lookup is skipped but the computed
    /// value still replaces the stored one. Errors from `compute` propagate;
    /// backend errors do not.
    pub fn get_or_compute<T, F>(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        compute: F,
    ) -> StatsResult<CacheRead<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> StatsResult<T>,
    {
        if !self.config.enabled {
            let value = compute()?;
            return Ok(CacheRead::from_storage(value, self.clock.now()));
        }

        let encoded = key.encode(&self.config.key_prefix);

        if freshness.reads_cache() {
            if let Some(hit) = self.lookup(&encoded) {
                debug!(key = %encoded, "cache hit");
                return Ok(hit);
            }
            debug!(key = %encoded, "cache miss");
        } else {
            debug!(key = %encoded, "cache bypassed for refresh");
        }

        let value = compute()?;
        let computed_at = self.clock.now();
        self.store(&encoded, &value, computed_at);
        Ok(CacheRead::from_storage(value, computed_at))
    }

    /// Whether an entry written at `cached_at` is still live at `now`.
    pub fn is_live(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match cached_at.checked_add_signed(self.config.ttl()) {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Drop every entry whose TTL has elapsed. Returns how many were removed.
    pub fn prune_expired(&self) -> StatsResult<u64> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.config.ttl())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Ok(self.backend.prune(cutoff)?)
    }

    fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<CacheRead<T>> {
        let entry = match self.backend.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed; recomputing");
                return None;
            }
        };

        if !self.is_live(entry.cached_at, self.clock.now()) {
            debug!(key, cached_at = %entry.cached_at, "cache entry expired");
            return None;
        }

        match serde_json::from_slice::<T>(&entry.bytes) {
            Ok(value) => Some(CacheRead::from_cache(value, entry.cached_at)),
            Err(e) => {
                warn!(key, error = %e, "undecodable cache entry; recomputing");
                None
            }
        }
    }

    fn store<T: Serialize>(&self, key: &str, value: &T, cached_at: DateTime<Utc>) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "cache value serialization failed");
                return;
            }
        };
        if let Err(e) = self.backend.put(key, &bytes, cached_at) {
            warn!(key, error = %e, "cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use chrono::{FixedOffset, Offset, TimeZone};
    use dlstats_core::{StatsError, StorageError};
    use std::cell::Cell;
    use std::sync::RwLock;

    struct TestClock(RwLock<DateTime<Utc>>);

    impl TestClock {
        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.write().unwrap();
            *now += by;
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.read().unwrap()
        }

        fn site_offset(&self) -> FixedOffset {
            Utc.fix()
        }
    }

    fn setup(config: CacheConfig) -> (ReadThroughCache<InMemoryCacheBackend>, Arc<TestClock>) {
        let clock = Arc::new(TestClock(RwLock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        )));
        let cache = ReadThroughCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            clock.clone(),
            config,
        );
        (cache, clock)
    }

    #[test]
    fn test_miss_then_hit() {
        let (cache, _clock) = setup(CacheConfig::default());
        let key = CacheKey::download_count(0, None);

        let first = cache
            .get_or_compute(&key, Freshness::Cached, || Ok(118u64))
            .unwrap();
        assert!(first.was_cache_miss());

        let second = cache
            .get_or_compute(&key, Freshness::Cached, || -> StatsResult<u64> {
                panic!("must be served from cache")
            })
            .unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.into_value(), 118);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (cache, clock) = setup(CacheConfig::default().with_ttl(Duration::from_secs(900)));
        let key = CacheKey::popular(0, 5);
        let calls = Cell::new(0);
        let compute = || -> StatsResult<Vec<u64>> {
            calls.set(calls.get() + 1);
            Ok(vec![1u64, 2, 3])
        };

        cache.get_or_compute(&key, Freshness::Cached, compute).unwrap();
        clock.advance(chrono::Duration::seconds(899));
        cache.get_or_compute(&key, Freshness::Cached, compute).unwrap();
        assert_eq!(calls.get(), 1);

        clock.advance(chrono::Duration::seconds(1));
        let read = cache.get_or_compute(&key, Freshness::Cached, compute).unwrap();
        assert_eq!(calls.get(), 2);
        assert!(read.was_cache_miss());
    }

    #[test]
    fn test_refresh_skips_read_but_writes() {
        let (cache, _clock) = setup(CacheConfig::default());
        let key = CacheKey::download_count(7, None);

        cache.get_or_compute(&key, Freshness::Cached, || Ok(1u64)).unwrap();
        let refreshed = cache
            .get_or_compute(&key, Freshness::Refresh, || Ok(2u64))
            .unwrap();
        assert!(refreshed.was_cache_miss());
        assert_eq!(*refreshed.value(), 2);

        let cached = cache
            .get_or_compute(&key, Freshness::Cached, || Ok(3u64))
            .unwrap();
        assert!(cached.was_cache_hit());
        assert_eq!(cached.into_value(), 2);
    }

    #[test]
    fn test_disabled_cache_always_computes_and_never_writes() {
        let (cache, _clock) = setup(CacheConfig::default().with_enabled(false));
        let key = CacheKey::download_count(0, None);

        cache.get_or_compute(&key, Freshness::Cached, || Ok(5u64)).unwrap();
        let read = cache.get_or_compute(&key, Freshness::Cached, || Ok(6u64)).unwrap();
        assert_eq!(read.into_value(), 6);
        assert!(cache.backend().is_empty());
    }

    #[test]
    fn test_compute_error_propagates_and_stores_nothing() {
        let (cache, _clock) = setup(CacheConfig::default());
        let key = CacheKey::download_count(0, None);

        let result = cache.get_or_compute(&key, Freshness::Cached, || -> StatsResult<u64> {
            Err(StorageError::query("sum_counters", "disk I/O error").into())
        });
        assert!(matches!(result, Err(StatsError::Storage(_))));
        assert!(cache.backend().is_empty());
    }

    #[test]
    fn test_undecodable_entry_is_a_miss() {
        let (cache, clock) = setup(CacheConfig::default());
        let key = CacheKey::download_count(0, None);
        cache
            .backend()
            .put(&key.encode("dedo_"), b"not json", clock.now())
            .unwrap();

        let read = cache.get_or_compute(&key, Freshness::Cached, || Ok(9u64)).unwrap();
        assert!(read.was_cache_miss());
        assert_eq!(read.into_value(), 9);
    }

    #[test]
    fn test_key_prefix_applied() {
        let (cache, _clock) = setup(CacheConfig::default().with_key_prefix("site2_"));
        let key = CacheKey::popular(30, 10);
        cache
            .get_or_compute(&key, Freshness::Cached, || Ok(Vec::<u64>::new()))
            .unwrap();
        assert!(cache.backend().get("site2_popular_days30limit10").unwrap().is_some());
    }

    #[test]
    fn test_prune_expired() {
        let (cache, clock) = setup(CacheConfig::default().with_ttl(Duration::from_secs(60)));
        cache
            .get_or_compute(&CacheKey::popular(0, 5), Freshness::Cached, || Ok(0u64))
            .unwrap();
        clock.advance(chrono::Duration::seconds(120));
        cache
            .get_or_compute(&CacheKey::popular(0, 6), Freshness::Cached, || Ok(0u64))
            .unwrap();

        assert_eq!(cache.prune_expired().unwrap(), 1);
        assert_eq!(cache.backend().len(), 1);
    }

    #[test]
    fn test_from_stats_config() {
        let stats = StatsConfig::default()
            .with_cache_ttl(Duration::from_secs(30))
            .with_cache_enabled(false);
        let config = CacheConfig::from_stats_config(&stats);
        assert!(!config.enabled);
        assert_eq!(config.entry_ttl, Duration::from_secs(30));
        assert_eq!(config.key_prefix, "dedo_");
    }
}
