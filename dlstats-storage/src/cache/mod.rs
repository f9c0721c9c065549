//! Result cache for statistics queries.
//!
//! Aggregation queries are cached for a short TTL under keys derived from
//! their full parameter set. Callers choose per call whether a live entry is
//! acceptable via [`Freshness`]; every read returns a [`CacheRead<T>`] that
//! says whether it came from the cache and when it was produced.
//!
//! Entries are not invalidated when events are written. A count may lag the
//! store by up to one TTL.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(backend, clock, CacheConfig::default());
//!
//! let read = cache.get_or_compute(
//!     &CacheKey::popular(30, 5),
//!     Freshness::from_use_cache(true),
//!     || compute_popular(30, 5),
//! )?;
//!
//! if read.was_cache_hit() {
//!     tracing::debug!(cached_at = %read.cached_at(), "served cached report");
//! }
//! ```

pub mod freshness;
pub mod key;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod read_through;
pub mod traits;

pub use freshness::{CacheRead, Freshness};
pub use key::CacheKey;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use read_through::{CacheConfig, ReadThroughCache};
pub use traits::{CacheBackend, CacheResult, CacheStats, CachedEntry};
