//! Property tests for the aggregator over the in-memory backend.

use std::sync::Arc;

use dlstats_aggregator::{
    CountQuery, DownloadStatus, LogFilter, PopularQuery, ProductId, Statistics, StatisticsStorage,
};
use dlstats_storage::InMemoryCacheBackend;
use dlstats_test_utils::{assertions, fixtures, generators, MockStorage, StaticPermissions};
use proptest::prelude::*;

fn statistics(storage: &Arc<MockStorage>) -> Statistics<MockStorage> {
    Statistics::new(
        storage.clone(),
        Arc::new(InMemoryCacheBackend::new()),
        storage.clone(),
        Arc::new(StaticPermissions::visitor()),
        Arc::new(fixtures::fixture_clock()),
        fixtures::test_config(),
    )
    .unwrap()
}

fn recent_events() -> impl Strategy<Value = Vec<dlstats_aggregator::NewDownloadEvent>> {
    prop::collection::vec(
        generators::arb_event_at(generators::arb_site_time_before(fixtures::days_ago(0), 45)),
        0..60,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A windowed count equals the success rows since the window start.
    #[test]
    fn prop_windowed_count_equals_count_logs(
        events in recent_events(),
        query in generators::arb_count_query(),
    ) {
        prop_assume!(query.days > 0);
        let storage = Arc::new(MockStorage::new());
        let stats = statistics(&storage);
        for e in &events {
            stats.record_download(e).unwrap();
        }

        let expected = stats.count_logs(&LogFilter {
            product_id: query.product_filter(),
            start: Some(stats.start_date_for_days(query.days)),
            end: None,
            status: Some(DownloadStatus::Success),
        }).unwrap();
        prop_assert_eq!(stats.count_downloads(&query).unwrap(), expected);
    }

    /// The all-time count equals the counter sum, which record_download
    /// keeps in step with the success rows.
    #[test]
    fn prop_all_time_count_equals_success_rows(
        events in recent_events(),
        product in proptest::option::of(generators::arb_product_id()),
    ) {
        let storage = Arc::new(MockStorage::new());
        let stats = statistics(&storage);
        for e in &events {
            stats.record_download(e).unwrap();
        }

        let query = CountQuery { days: 0, product_id: product, use_cache: true };
        let counter_sum = storage.sum_counters(product).unwrap().unwrap_or(0);
        let success_rows = stats.count_logs(&LogFilter {
            product_id: product,
            status: Some(DownloadStatus::Success),
            ..Default::default()
        }).unwrap();
        let count = stats.count_downloads(&query).unwrap();
        prop_assert_eq!(count, counter_sum);
        prop_assert_eq!(count, success_rows);
    }

    /// Reports are ranked and bounded for every query shape.
    #[test]
    fn prop_popular_is_ranked_and_bounded(
        events in recent_events(),
        query in generators::arb_popular_query(),
    ) {
        let storage = Arc::new(MockStorage::new());
        for id in 1..8 {
            storage.add_product(ProductId(id), &format!("Product {id}"), id % 3 != 0);
        }
        let stats = statistics(&storage);
        for e in &events {
            stats.record_download(e).unwrap();
        }

        let report = stats.popular_downloads(&query).unwrap();
        assertions::assert_ranked(&report, query.limit_or(stats.config().popular_limit));
    }

    /// With the store unchanged, a cached read repeats the first answer.
    #[test]
    fn prop_cached_reads_are_stable(
        events in recent_events(),
        days in 0u32..30,
        limit in 1u32..10,
    ) {
        let storage = Arc::new(MockStorage::new());
        let stats = statistics(&storage);
        for e in &events {
            stats.record_download(e).unwrap();
        }

        let count = CountQuery::default().days(days);
        prop_assert_eq!(
            stats.count_downloads(&count).unwrap(),
            stats.count_downloads(&count).unwrap()
        );
        let popular = PopularQuery::default().days(days).limit(limit);
        prop_assert_eq!(
            stats.popular_downloads(&popular).unwrap(),
            stats.popular_downloads(&popular).unwrap()
        );
    }
}
