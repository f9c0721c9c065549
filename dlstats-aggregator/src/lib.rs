//! dlstats Aggregator - Download Statistics
//!
//! The entry point the host calls. [`Statistics`] answers counting and
//! ranking queries by choosing, per request, between the per-product
//! counters (all time) and the raw event rows (bounded windows), with a
//! short-lived result cache in front of both. Retention and table
//! administration live in [`admin`].

pub mod admin;

pub use dlstats_core::{
    AdminOutcome, CountQuery, DeleteFilter, DownloadStatus, DownloadWindow, EventId, LogFilter,
    NewDownloadEvent, PopularDownload, PopularQuery, ProductId, SiteTime, StatsConfig,
    StatsError, StatsResult,
};
pub use dlstats_storage::{
    CacheBackend, CacheStats, InMemoryCacheBackend, MockStorage, StatisticsStorage,
};

use dlstats_core::{Clock, PermissionCheck, ProductCatalog};
use dlstats_storage::{CacheConfig, CacheKey, Freshness, ReadThroughCache};
use std::sync::Arc;

/// Download statistics over a store and a result cache.
///
/// Every collaborator is injected; nothing is read from globals. The type is
/// `Send + Sync` whenever its handles are, and holds no locks of its own.
pub struct Statistics<S: StatisticsStorage, C: CacheBackend = InMemoryCacheBackend> {
    pub(crate) storage: Arc<S>,
    pub(crate) cache: ReadThroughCache<C>,
    pub(crate) catalog: Arc<dyn ProductCatalog>,
    pub(crate) permissions: Arc<dyn PermissionCheck>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: StatsConfig,
}

impl<S: StatisticsStorage, C: CacheBackend> Statistics<S, C> {
    /// Wire up the statistics subsystem.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Config` if `config` fails validation.
    pub fn new(
        storage: Arc<S>,
        cache_backend: Arc<C>,
        catalog: Arc<dyn ProductCatalog>,
        permissions: Arc<dyn PermissionCheck>,
        clock: Arc<dyn Clock>,
        config: StatsConfig,
    ) -> StatsResult<Self> {
        config.validate()?;
        let cache = ReadThroughCache::new(
            cache_backend,
            clock.clone(),
            CacheConfig::from_stats_config(&config),
        );
        Ok(Self {
            storage,
            cache,
            catalog,
            permissions,
            clock,
            config,
        })
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Site-local time `days` calendar days before now, whole seconds.
    pub fn start_date_for_days(&self, days: u32) -> SiteTime {
        let now = self.clock.local_now();
        DownloadWindow::from_days(days, now).start().unwrap_or(now)
    }

    /// Which source answers a "last `days` days" query.
    pub fn window(&self, days: u32) -> DownloadWindow {
        DownloadWindow::from_days(days, self.clock.local_now())
    }

    // === Queries ===

    /// Number of successful downloads.
    ///
    /// `days == 0` sums the per-product counters; otherwise success events
    /// since `now - days` are counted. Product 0 counts every product. The
    /// result is cached under the query shape and written back even when
    /// `use_cache` is false.
    pub fn count_downloads(&self, query: &CountQuery) -> StatsResult<u64> {
        let product_id = query.product_filter();
        let key = CacheKey::download_count(query.days, product_id);
        let read = self.cache.get_or_compute(
            &key,
            Freshness::from_use_cache(query.use_cache),
            || match self.window(query.days) {
                DownloadWindow::AllTime => Ok(self.storage.sum_counters(product_id)?.unwrap_or(0)),
                DownloadWindow::Since(start) => {
                    tracing::debug!(days = query.days, start = %start, "counting from event rows");
                    self.count_logs(&LogFilter {
                        product_id,
                        start: Some(start),
                        end: None,
                        status: Some(DownloadStatus::Success),
                    })
                }
            },
        )?;
        Ok(read.into_value())
    }

    /// Number of event rows matching `filter`. Never cached.
    pub fn count_logs(&self, filter: &LogFilter) -> StatsResult<u64> {
        self.storage.count_events(filter)
    }

    /// Popular-downloads query carrying the configured row limit.
    pub fn popular_query(&self) -> PopularQuery {
        PopularQuery::default().limit(self.config.popular_limit)
    }

    /// Most downloaded products, descending by count, at most `limit` rows.
    ///
    /// Without an explicit limit the configured `popular_limit` applies.
    /// `days == 0` ranks published products by their counters; otherwise
    /// success events since `now - days` are grouped per product and titles
    /// are resolved through the catalog.
    pub fn popular_downloads(&self, query: &PopularQuery) -> StatsResult<Vec<PopularDownload>> {
        let limit = query.limit_or(self.config.popular_limit);
        let key = CacheKey::popular(query.days, limit);
        let read = self.cache.get_or_compute(
            &key,
            Freshness::from_use_cache(query.use_cache),
            || match self.window(query.days) {
                DownloadWindow::AllTime => self.storage.top_counters(limit),
                DownloadWindow::Since(start) => {
                    let tallies = self
                        .storage
                        .tally_since(DownloadStatus::Success, start, limit)?;
                    Ok(tallies
                        .into_iter()
                        .map(|t| PopularDownload {
                            product_id: t.product_id,
                            title: self.catalog.title(t.product_id),
                            download_count: t.downloads,
                        })
                        .collect())
                }
            },
        )?;
        Ok(read.into_value())
    }

    // === Recording ===

    /// Append a download event; successful downloads also bump the
    /// product's counter. Cached results are left alone.
    pub fn record_download(&self, event: &NewDownloadEvent) -> StatsResult<EventId> {
        let id = self.storage.insert_event(event)?;
        if event.status.is_countable() {
            let count = self.storage.increment_counter(event.product_id)?;
            tracing::debug!(
                event_id = %id,
                product_id = %event.product_id,
                count,
                "download recorded"
            );
        } else {
            tracing::debug!(
                event_id = %id,
                product_id = %event.product_id,
                status = %event.status,
                "download attempt recorded"
            );
        }
        Ok(id)
    }
}
