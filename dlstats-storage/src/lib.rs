//! dlstats Storage - Storage Trait and Mock Implementation
//!
//! Defines the storage abstraction for download events and per-product
//! counters, plus the result cache that sits in front of it.
//! The SQL implementation lives in dlstats-sqlite.

pub mod cache;

// Re-export cache types for aggregator integration
pub use cache::{
    CacheBackend, CacheConfig, CacheKey, CacheRead, CacheStats, CachedEntry, Freshness,
    InMemoryCacheBackend, LmdbCacheBackend, LmdbCacheError, ReadThroughCache,
};

use dlstats_core::{
    DeleteFilter, DownloadEvent, DownloadStatus, EventId, LogFilter, NewDownloadEvent,
    PopularDownload, ProductCatalog, ProductId, ProductTally, SiteTime, StatsConfig, StatsResult,
    StorageError,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Storage trait for the event table and the counter attributes.
///
/// Event operations fail with [`StorageError::TableMissing`] while the event
/// table does not exist. Counter operations never touch the event table.
pub trait StatisticsStorage: Send + Sync {
    // === Event Table Lifecycle ===

    /// Create the event table and its indexes if they are missing.
    fn setup_table(&self) -> StatsResult<()>;

    /// Drop the event table if it exists.
    fn drop_table(&self) -> StatsResult<()>;

    /// Whether the event table currently exists.
    fn table_exists(&self) -> StatsResult<bool>;

    /// Delete every event row. Returns the number of rows removed.
    fn truncate(&self) -> StatsResult<u64>;

    // === Event Operations ===

    /// Append an event and return its assigned id.
    fn insert_event(&self, event: &NewDownloadEvent) -> StatsResult<EventId>;

    /// Count rows matching every present field of `filter`.
    fn count_events(&self, filter: &LogFilter) -> StatsResult<u64>;

    /// Group rows with `status` and `timestamp >= start` by product.
    ///
    /// Ordered by count descending, then product id ascending; at most
    /// `limit` rows.
    fn tally_since(
        &self,
        status: DownloadStatus,
        start: SiteTime,
        limit: u32,
    ) -> StatsResult<Vec<ProductTally>>;

    /// Delete matching rows oldest first. Returns the number removed.
    fn delete_events(&self, filter: &DeleteFilter) -> StatsResult<u64>;

    // === Counter Operations ===

    /// Sum of counters for one product or all of them.
    /// `None` when no counter exists.
    fn sum_counters(&self, product_id: Option<ProductId>) -> StatsResult<Option<u64>>;

    /// Atomically add one to a product's counter, creating it at 1.
    /// Returns the new value.
    fn increment_counter(&self, product_id: ProductId) -> StatsResult<u64>;

    /// Published download products ranked by counter, descending, then by
    /// product id. At most `limit` rows.
    fn top_counters(&self, limit: u32) -> StatsResult<Vec<PopularDownload>>;
}

// ============================================================================
// MOCK STORAGE
// ============================================================================

#[derive(Debug, Default)]
struct EventTable {
    rows: Vec<DownloadEvent>,
    next_id: u64,
}

#[derive(Debug, Clone)]
struct MockProduct {
    title: String,
    published: bool,
}

/// In-memory storage for tests and embedding.
///
/// Host products registered with [`MockStorage::add_product`] back both the
/// counter ranking and the [`ProductCatalog`] implementation. Every
/// registered product counts as a download product: `top_counters` filters
/// on the published flag only, with no product type to check.
#[derive(Debug, Clone)]
pub struct MockStorage {
    table: String,
    events: Arc<RwLock<Option<EventTable>>>,
    counters: Arc<RwLock<HashMap<ProductId, u64>>>,
    products: Arc<RwLock<HashMap<ProductId, MockProduct>>>,
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::for_config(&StatsConfig::default())
    }
}

impl MockStorage {
    /// Create a new mock storage with the event table already set up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock storage reporting the table name of `config` in errors.
    pub fn for_config(config: &StatsConfig) -> Self {
        Self {
            table: config.statistics_table(),
            events: Arc::new(RwLock::new(Some(EventTable::default()))),
            counters: Arc::new(RwLock::new(HashMap::new())),
            products: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Mock storage without an event table.
    pub fn without_table() -> Self {
        let storage = Self::default();
        if let Ok(mut events) = storage.events.write() {
            *events = None;
        }
        storage
    }

    /// Register a host product.
    pub fn add_product(&self, product_id: ProductId, title: &str, published: bool) {
        if let Ok(mut products) = self.products.write() {
            products.insert(
                product_id,
                MockProduct {
                    title: title.to_string(),
                    published,
                },
            );
        }
    }

    /// Overwrite a product's counter.
    pub fn set_counter(&self, product_id: ProductId, count: u64) {
        if let Ok(mut counters) = self.counters.write() {
            counters.insert(product_id, count);
        }
    }

    /// Current counter value, if any.
    pub fn counter(&self, product_id: ProductId) -> Option<u64> {
        self.counters
            .read()
            .ok()
            .and_then(|c| c.get(&product_id).copied())
    }

    /// Number of stored events; 0 when the table is missing.
    pub fn event_count(&self) -> usize {
        self.events
            .read()
            .ok()
            .and_then(|e| e.as_ref().map(|t| t.rows.len()))
            .unwrap_or(0)
    }

    /// Snapshot of stored events in insertion order.
    pub fn events(&self) -> Vec<DownloadEvent> {
        self.events
            .read()
            .ok()
            .and_then(|e| e.as_ref().map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    fn missing(&self) -> StorageError {
        StorageError::TableMissing {
            table: self.table.clone(),
        }
    }

    fn with_table<R>(&self, f: impl FnOnce(&EventTable) -> R) -> StatsResult<R> {
        let events = self.events.read().map_err(|_| StorageError::LockPoisoned)?;
        match events.as_ref() {
            Some(table) => Ok(f(table)),
            None => Err(self.missing().into()),
        }
    }

    fn with_table_mut<R>(&self, f: impl FnOnce(&mut EventTable) -> R) -> StatsResult<R> {
        let mut events = self.events.write().map_err(|_| StorageError::LockPoisoned)?;
        match events.as_mut() {
            Some(table) => Ok(f(table)),
            None => Err(self.missing().into()),
        }
    }
}

impl StatisticsStorage for MockStorage {
    // === Event Table Lifecycle ===

    fn setup_table(&self) -> StatsResult<()> {
        let mut events = self.events.write().map_err(|_| StorageError::LockPoisoned)?;
        if events.is_none() {
            *events = Some(EventTable::default());
        }
        Ok(())
    }

    fn drop_table(&self) -> StatsResult<()> {
        let mut events = self.events.write().map_err(|_| StorageError::LockPoisoned)?;
        *events = None;
        Ok(())
    }

    fn table_exists(&self) -> StatsResult<bool> {
        let events = self.events.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(events.is_some())
    }

    fn truncate(&self) -> StatsResult<u64> {
        self.with_table_mut(|table| {
            let removed = table.rows.len() as u64;
            table.rows.clear();
            removed
        })
    }

    // === Event Operations ===

    fn insert_event(&self, event: &NewDownloadEvent) -> StatsResult<EventId> {
        self.with_table_mut(|table| {
            table.next_id += 1;
            let id = EventId(table.next_id);
            table.rows.push(event.clone().into_event(id));
            id
        })
    }

    fn count_events(&self, filter: &LogFilter) -> StatsResult<u64> {
        self.with_table(|table| {
            table
                .rows
                .iter()
                .filter(|e| filter.matches(e.status, e.timestamp, e.product_id))
                .count() as u64
        })
    }

    fn tally_since(
        &self,
        status: DownloadStatus,
        start: SiteTime,
        limit: u32,
    ) -> StatsResult<Vec<ProductTally>> {
        self.with_table(|table| {
            let mut counts: HashMap<ProductId, u64> = HashMap::new();
            for e in table
                .rows
                .iter()
                .filter(|e| e.status == status && e.timestamp >= start)
            {
                *counts.entry(e.product_id).or_insert(0) += 1;
            }

            let mut tallies: Vec<ProductTally> = counts
                .into_iter()
                .map(|(product_id, downloads)| ProductTally {
                    product_id,
                    downloads,
                })
                .collect();
            tallies.sort_by(|a, b| {
                b.downloads
                    .cmp(&a.downloads)
                    .then(a.product_id.cmp(&b.product_id))
            });
            tallies.truncate(limit as usize);
            tallies
        })
    }

    fn delete_events(&self, filter: &DeleteFilter) -> StatsResult<u64> {
        self.with_table_mut(|table| {
            let mut doomed: Vec<(SiteTime, EventId)> = table
                .rows
                .iter()
                .filter(|e| filter.matches(e.status, e.timestamp))
                .map(|e| (e.timestamp, e.id))
                .collect();
            doomed.sort();
            if let Some(limit) = filter.limit {
                doomed.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            }

            let ids: HashSet<EventId> = doomed.into_iter().map(|(_, id)| id).collect();
            table.rows.retain(|e| !ids.contains(&e.id));
            ids.len() as u64
        })
    }

    // === Counter Operations ===

    fn sum_counters(&self, product_id: Option<ProductId>) -> StatsResult<Option<u64>> {
        let counters = self.counters.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(match product_id {
            Some(id) => counters.get(&id).copied(),
            None if counters.is_empty() => None,
            None => Some(counters.values().sum()),
        })
    }

    fn increment_counter(&self, product_id: ProductId) -> StatsResult<u64> {
        let mut counters = self.counters.write().map_err(|_| StorageError::LockPoisoned)?;
        let count = counters.entry(product_id).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn top_counters(&self, limit: u32) -> StatsResult<Vec<PopularDownload>> {
        let counters = self.counters.read().map_err(|_| StorageError::LockPoisoned)?;
        let products = self.products.read().map_err(|_| StorageError::LockPoisoned)?;

        let mut ranked: Vec<PopularDownload> = counters
            .iter()
            .filter_map(|(id, count)| {
                products
                    .get(id)
                    .filter(|p| p.published)
                    .map(|p| PopularDownload {
                        product_id: *id,
                        title: p.title.clone(),
                        download_count: *count,
                    })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.download_count
                .cmp(&a.download_count)
                .then(a.product_id.cmp(&b.product_id))
        });
        ranked.truncate(limit as usize);
        Ok(ranked)
    }
}

impl ProductCatalog for MockStorage {
    fn title(&self, product_id: ProductId) -> String {
        self.products
            .read()
            .ok()
            .and_then(|p| p.get(&product_id).map(|p| p.title.clone()))
            .unwrap_or_default()
    }

    fn is_published(&self, product_id: ProductId) -> bool {
        self.products
            .read()
            .ok()
            .and_then(|p| p.get(&product_id).map(|p| p.published))
            .unwrap_or(false)
    }
}

// ============================================================================
// TESTS
// ============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::NaiveDate;
    use dlstats_core::UserId;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv6Addr};

    fn arb_status() -> impl Strategy<Value = DownloadStatus> {
        prop_oneof![
            Just(DownloadStatus::Success),
            Just(DownloadStatus::Denied),
            Just(DownloadStatus::Failed),
        ]
    }

    fn arb_event() -> impl Strategy<Value = NewDownloadEvent> {
        (arb_status(), 0i64..(86_400 * 60), 1u64..6).prop_map(|(status, secs, product)| {
            let base = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap();
            NewDownloadEvent::new(
                status,
                base + chrono::Duration::seconds(secs),
                ProductId(product),
                UserId::ANONYMOUS,
                IpAddr::V6(Ipv6Addr::LOCALHOST),
                "",
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// An unfiltered count equals the number of inserted events.
        #[test]
        fn prop_unfiltered_count_is_total(events in prop::collection::vec(arb_event(), 0..40)) {
            let storage = MockStorage::new();
            for e in &events {
                storage.insert_event(e).unwrap();
            }
            prop_assert_eq!(
                storage.count_events(&LogFilter::default()).unwrap(),
                events.len() as u64
            );
        }

        /// Per-status counts partition the total.
        #[test]
        fn prop_status_counts_partition(events in prop::collection::vec(arb_event(), 0..40)) {
            let storage = MockStorage::new();
            for e in &events {
                storage.insert_event(e).unwrap();
            }
            let total: u64 = [DownloadStatus::Success, DownloadStatus::Denied, DownloadStatus::Failed]
                .into_iter()
                .map(|s| storage.count_events(&LogFilter { status: Some(s), ..Default::default() }).unwrap())
                .sum();
            prop_assert_eq!(total, events.len() as u64);
        }

        /// A limited delete removes exactly min(limit, eligible) rows, and
        /// every survivor is at least as new as every removed row.
        #[test]
        fn prop_limited_delete_removes_oldest(
            events in prop::collection::vec(arb_event(), 0..40),
            limit in 0u64..50,
        ) {
            let storage = MockStorage::new();
            for e in &events {
                storage.insert_event(e).unwrap();
            }
            let before = storage.events();
            let deleted = storage
                .delete_events(&DeleteFilter::default().with_limit(limit))
                .unwrap();
            prop_assert_eq!(deleted, limit.min(events.len() as u64));

            let after = storage.events();
            let kept: HashSet<EventId> = after.iter().map(|e| e.id).collect();
            let newest_removed = before
                .iter()
                .filter(|e| !kept.contains(&e.id))
                .map(|e| (e.timestamp, e.id))
                .max();
            if let Some(newest_removed) = newest_removed {
                for e in &after {
                    prop_assert!((e.timestamp, e.id) > newest_removed);
                }
            }
        }

        /// Tallies are sorted descending and bounded by the limit.
        #[test]
        fn prop_tally_sorted_and_bounded(
            events in prop::collection::vec(arb_event(), 0..40),
            limit in 0u32..8,
        ) {
            let storage = MockStorage::new();
            for e in &events {
                storage.insert_event(e).unwrap();
            }
            let start = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap();
            let tallies = storage.tally_since(DownloadStatus::Success, start, limit).unwrap();
            prop_assert!(tallies.len() <= limit as usize);
            for pair in tallies.windows(2) {
                prop_assert!(pair[0].downloads >= pair[1].downloads);
            }
        }
    }
}
