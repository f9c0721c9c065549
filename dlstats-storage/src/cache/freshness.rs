//! Freshness contracts for cache reads.
//!
//! Callers state whether a live cached result is acceptable. Opting out
//! only skips the read: the recomputed result is still written back.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Freshness requirement for a cached query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve a live cached value if one exists.
    #[default]
    Cached,

    /// Recompute from storage, then overwrite the cached value.
    Refresh,
}

impl Freshness {
    /// Map the `use_cache` flag of a query.
    pub fn from_use_cache(use_cache: bool) -> Self {
        if use_cache {
            Freshness::Cached
        } else {
            Freshness::Refresh
        }
    }

    pub fn reads_cache(&self) -> bool {
        matches!(self, Freshness::Cached)
    }
}

/// Result of a read-through lookup, carrying where the value came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    /// The value.
    value: T,
    /// When this value was cached (or computed, on a miss).
    cached_at: DateTime<Utc>,
    /// Whether this was a cache hit or miss.
    was_cache_hit: bool,
}

impl<T> CacheRead<T> {
    /// Create a cache read from a cache hit.
    pub fn from_cache(value: T, cached_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at,
            was_cache_hit: true,
        }
    }

    /// Create a cache read from a freshly computed value.
    pub fn from_storage(value: T, computed_at: DateTime<Utc>) -> Self {
        Self {
            value,
            cached_at: computed_at,
            was_cache_hit: false,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// When the value was cached or computed.
    pub fn cached_at(&self) -> DateTime<Utc> {
        self.cached_at
    }

    /// Age of the value relative to `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_freshness_from_use_cache() {
        assert_eq!(Freshness::from_use_cache(true), Freshness::Cached);
        assert_eq!(Freshness::from_use_cache(false), Freshness::Refresh);
        assert!(Freshness::default().reads_cache());
        assert!(!Freshness::Refresh.reads_cache());
    }

    #[test]
    fn test_cache_read_age() {
        let cached_at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let read = CacheRead::from_cache(7u64, cached_at);
        let later = cached_at + chrono::Duration::seconds(90);
        assert_eq!(read.age_at(later), Duration::from_secs(90));
        assert_eq!(read.age_at(cached_at - chrono::Duration::seconds(5)), Duration::ZERO);
        assert!(read.was_cache_hit());
        assert_eq!(read.into_value(), 7);
    }

    #[test]
    fn test_cache_read_from_storage_is_miss() {
        let now = Utc::now();
        let read = CacheRead::from_storage("x", now);
        assert!(read.was_cache_miss());
        assert_eq!(read.cached_at(), now);
        assert_eq!(*read.value(), "x");
    }
}
