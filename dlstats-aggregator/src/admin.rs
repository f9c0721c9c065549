//! Retention and table administration.
//!
//! Truncating and dropping the event table require the administrator
//! capability. A caller without it gets [`AdminOutcome::Denied`] and the
//! store is left untouched.

use dlstats_core::{AdminOutcome, DeleteFilter, StatsResult};
use dlstats_storage::{CacheBackend, StatisticsStorage};

use crate::Statistics;

impl<S: StatisticsStorage, C: CacheBackend> Statistics<S, C> {
    /// Delete event rows matching `filter`, oldest first.
    ///
    /// Date bounds are exclusive. Cached results are not invalidated, so
    /// counts may still include deleted rows until their entries expire.
    pub fn delete_logs(&self, filter: &DeleteFilter) -> StatsResult<u64> {
        let deleted = self.storage.delete_events(filter)?;
        tracing::info!(
            deleted,
            start = ?filter.start,
            end = ?filter.end,
            limit = ?filter.limit,
            status = ?filter.status,
            "Deleted download logs"
        );
        Ok(deleted)
    }

    /// Remove every event row.
    pub fn empty_table(&self) -> StatsResult<AdminOutcome> {
        if !self.permissions.is_administrator() {
            tracing::warn!(
                table = %self.config.statistics_table(),
                "Refusing to empty statistics table: caller is not an administrator"
            );
            return Ok(AdminOutcome::Denied);
        }
        let removed = self.storage.truncate()?;
        tracing::info!(
            table = %self.config.statistics_table(),
            removed,
            "Emptied statistics table"
        );
        Ok(AdminOutcome::Completed(removed))
    }

    /// Drop the event table if it exists.
    pub fn delete_table(&self) -> StatsResult<AdminOutcome> {
        if !self.permissions.is_administrator() {
            tracing::warn!(
                table = %self.config.statistics_table(),
                "Refusing to drop statistics table: caller is not an administrator"
            );
            return Ok(AdminOutcome::Denied);
        }
        self.storage.drop_table()?;
        tracing::info!(table = %self.config.statistics_table(), "Dropped statistics table");
        Ok(AdminOutcome::Completed(0))
    }

    /// Create the event table and its indexes if missing. Not gated.
    pub fn setup_table(&self) -> StatsResult<()> {
        self.storage.setup_table()?;
        tracing::info!(table = %self.config.statistics_table(), "Statistics table ready");
        Ok(())
    }

    /// Evict cache entries whose TTL has elapsed.
    pub fn prune_cache(&self) -> StatsResult<u64> {
        let pruned = self.cache.prune_expired()?;
        tracing::debug!(pruned, "Pruned expired statistics cache entries");
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use crate::*;
    use dlstats_test_utils::{assertions, fixtures, StaticPermissions};
    use std::sync::Arc;

    fn stats_with(
        permissions: Arc<StaticPermissions>,
    ) -> (Statistics<MockStorage>, Arc<MockStorage>) {
        let storage = Arc::new(MockStorage::new());
        let stats = Statistics::new(
            storage.clone(),
            Arc::new(InMemoryCacheBackend::new()),
            storage.clone(),
            permissions,
            Arc::new(fixtures::fixture_clock()),
            fixtures::test_config(),
        )
        .unwrap();
        (stats, storage)
    }

    fn seed(storage: &MockStorage, days: &[i64]) {
        for d in days {
            storage
                .insert_event(&fixtures::success(1, fixtures::days_ago(*d)))
                .unwrap();
        }
    }

    #[test]
    fn test_delete_logs_limit_removes_oldest() {
        let (stats, storage) = stats_with(Arc::new(StaticPermissions::visitor()));
        seed(&storage, &[1, 5, 2, 4, 3]);

        let deleted = stats
            .delete_logs(&DeleteFilter::default().with_limit(2))
            .unwrap();
        assert_eq!(deleted, 2);

        let mut left: Vec<_> = storage.events().into_iter().map(|e| e.timestamp).collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                fixtures::days_ago(3),
                fixtures::days_ago(2),
                fixtures::days_ago(1)
            ]
        );
    }

    #[test]
    fn test_delete_logs_older_than_is_exclusive() {
        let (stats, storage) = stats_with(Arc::new(StaticPermissions::visitor()));
        seed(&storage, &[10, 30, 31, 60]);

        let deleted = stats
            .delete_logs(&DeleteFilter::older_than(fixtures::days_ago(30)))
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(storage.event_count(), 2);
    }

    #[test]
    fn test_delete_logs_by_status() {
        let (stats, storage) = stats_with(Arc::new(StaticPermissions::visitor()));
        storage
            .insert_event(&fixtures::event(DownloadStatus::Denied, 1, fixtures::days_ago(1)))
            .unwrap();
        seed(&storage, &[1]);

        let deleted = stats
            .delete_logs(&DeleteFilter::default().with_status(DownloadStatus::Denied))
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(storage.events()[0].status, DownloadStatus::Success);
    }

    #[test]
    fn test_empty_table_requires_administrator() {
        let permissions = Arc::new(StaticPermissions::visitor());
        let (stats, storage) = stats_with(permissions.clone());
        seed(&storage, &[1, 2]);

        assert_eq!(stats.empty_table().unwrap(), AdminOutcome::Denied);
        assert_eq!(storage.event_count(), 2);

        permissions.set_administrator(true);
        assert_eq!(stats.empty_table().unwrap(), AdminOutcome::Completed(2));
        assert_eq!(storage.event_count(), 0);
        assert!(storage.table_exists().unwrap());
    }

    #[test]
    fn test_delete_table_requires_administrator() {
        let permissions = Arc::new(StaticPermissions::visitor());
        let (stats, storage) = stats_with(permissions.clone());

        assert!(stats.delete_table().unwrap().is_denied());
        assert!(storage.table_exists().unwrap());

        permissions.set_administrator(true);
        assert_eq!(stats.delete_table().unwrap(), AdminOutcome::Completed(0));
        assert!(!storage.table_exists().unwrap());
        assertions::assert_table_missing(&stats.count_logs(&LogFilter::default()));

        // Dropping again is harmless.
        assert_eq!(stats.delete_table().unwrap(), AdminOutcome::Completed(0));
    }

    #[test]
    fn test_setup_table_is_idempotent_and_ungated() {
        let (stats, storage) = stats_with(Arc::new(StaticPermissions::visitor()));
        storage.drop_table().unwrap();

        stats.setup_table().unwrap();
        assert!(storage.table_exists().unwrap());
        seed(&storage, &[1]);
        stats.setup_table().unwrap();
        assert_eq!(stats.count_logs(&LogFilter::default()).unwrap(), 1);
    }

    #[test]
    fn test_prune_cache_with_nothing_stale() {
        let (stats, _storage) = stats_with(Arc::new(StaticPermissions::visitor()));
        stats.count_downloads(&CountQuery::default()).unwrap();
        assert_eq!(stats.prune_cache().unwrap(), 0);
    }
}
