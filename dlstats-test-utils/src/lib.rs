//! dlstats Test Utilities
//!
//! Centralized test infrastructure for the dlstats workspace:
//! - Host collaborator doubles (clock, permissions, failing cache)
//! - Proptest generators for events and query shapes
//! - Test fixtures for common scenarios
//! - Custom assertions for statistics results

// Re-export mock storage from its source crate
pub use dlstats_storage::{InMemoryCacheBackend, MockStorage};

// Re-export core types for convenience
pub use dlstats_core::{
    CountQuery, DeleteFilter, DownloadStatus, LogFilter, NewDownloadEvent, PopularDownload,
    PopularQuery, ProductId, SiteTime, StatsConfig, StatsError, StatsResult, StorageError,
    UserId, UserIp,
};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use dlstats_core::{CacheError, Clock, PermissionCheck};
use dlstats_storage::cache::{CacheBackend, CacheResult, CacheStats, CachedEntry};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

// ============================================================================
// HOST DOUBLES
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    /// Clock stopped at `now`, site timezone UTC.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self::with_offset(now, Utc.fix())
    }

    pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: RwLock::new(now),
            offset,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut now) = self.now.write() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.read().map(|n| *n).unwrap_or_else(|_| Utc::now())
    }

    fn site_offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Permission check with a switchable answer.
#[derive(Debug)]
pub struct StaticPermissions {
    admin: AtomicBool,
}

impl StaticPermissions {
    pub fn administrator() -> Self {
        Self {
            admin: AtomicBool::new(true),
        }
    }

    pub fn visitor() -> Self {
        Self {
            admin: AtomicBool::new(false),
        }
    }

    pub fn set_administrator(&self, admin: bool) {
        self.admin.store(admin, Ordering::SeqCst);
    }
}

impl PermissionCheck for StaticPermissions {
    fn is_administrator(&self) -> bool {
        self.admin.load(Ordering::SeqCst)
    }
}

/// Cache backend whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingCacheBackend {
    gets: AtomicU64,
    puts: AtomicU64,
}

impl FailingCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attempted reads.
    pub fn get_attempts(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of attempted writes.
    pub fn put_attempts(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    fn unavailable() -> CacheError {
        CacheError::Backend {
            reason: "cache unavailable".to_string(),
        }
    }
}

impl CacheBackend for FailingCacheBackend {
    fn get(&self, _key: &str) -> CacheResult<Option<CachedEntry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Err(Self::unavailable())
    }

    fn put(&self, _key: &str, _bytes: &[u8], _cached_at: DateTime<Utc>) -> CacheResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        Err(Self::unavailable())
    }

    fn delete(&self, _key: &str) -> CacheResult<bool> {
        Err(Self::unavailable())
    }

    fn prune(&self, _cached_before: DateTime<Utc>) -> CacheResult<u64> {
        Err(Self::unavailable())
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating dlstats types.

    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    /// Generate any download status.
    pub fn arb_status() -> impl Strategy<Value = DownloadStatus> {
        prop_oneof![
            Just(DownloadStatus::Success),
            Just(DownloadStatus::Denied),
            Just(DownloadStatus::Failed),
        ]
    }

    /// Generate a product id from a small pool so tallies collide.
    pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
        (1u64..8).prop_map(ProductId)
    }

    /// Generate a user id, anonymous about a quarter of the time.
    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        prop_oneof![
            1 => Just(UserId::ANONYMOUS),
            3 => (1u64..10_000).prop_map(UserId),
        ]
    }

    /// Generate an IPv4 or IPv6 address.
    pub fn arb_user_ip() -> impl Strategy<Value = UserIp> {
        prop_oneof![
            any::<[u8; 4]>().prop_map(|o| UserIp::from(IpAddr::V4(Ipv4Addr::from(o)))),
            any::<[u8; 16]>().prop_map(|o| UserIp::from(IpAddr::V6(Ipv6Addr::from(o)))),
        ]
    }

    /// Generate a site time within `days_back` days before `end`.
    pub fn arb_site_time_before(end: SiteTime, days_back: i64) -> impl Strategy<Value = SiteTime> {
        (0..days_back * 86_400).prop_map(move |secs| end - chrono::Duration::seconds(secs))
    }

    /// Generate a site time during the first half of 2024.
    pub fn arb_site_time() -> impl Strategy<Value = SiteTime> {
        let end = NaiveDate::from_ymd_opt(2024, 7, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .expect("valid fixture date");
        arb_site_time_before(end, 180)
    }

    /// Generate a user agent string, sometimes longer than the column.
    pub fn arb_user_agent() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
            Just("curl/8.4.0".to_string()),
            "[ -~]{0,300}",
        ]
    }

    /// Generate an event payload at a time drawn from `times`.
    pub fn arb_event_at(
        times: impl Strategy<Value = SiteTime>,
    ) -> impl Strategy<Value = NewDownloadEvent> {
        (
            arb_status(),
            times,
            arb_product_id(),
            arb_user_id(),
            arb_user_ip(),
            arb_user_agent(),
        )
            .prop_map(|(status, ts, product, user, ip, agent)| {
                NewDownloadEvent::new(status, ts, product, user, ip, &agent)
            })
    }

    /// Generate an event payload.
    pub fn arb_event() -> impl Strategy<Value = NewDownloadEvent> {
        arb_event_at(arb_site_time())
    }

    /// Generate a count query. Product 0 ("all products") shows up too.
    pub fn arb_count_query() -> impl Strategy<Value = CountQuery> {
        let product = prop_oneof![1 => Just(ProductId(0)), 4 => arb_product_id()];
        (0u32..60, proptest::option::of(product), any::<bool>()).prop_map(
            |(days, product_id, use_cache)| CountQuery {
                days,
                product_id,
                use_cache,
            },
        )
    }

    /// Generate a popular-downloads query, sometimes without a limit.
    pub fn arb_popular_query() -> impl Strategy<Value = PopularQuery> {
        (0u32..60, proptest::option::of(0u32..12), any::<bool>()).prop_map(|(days, limit, use_cache)| PopularQuery {
            days,
            limit,
            use_cache,
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::TimeZone;
    use std::net::{IpAddr, Ipv4Addr};

    /// Fixed "now" used across the workspace tests: 2024-06-15 12:00:00 UTC.
    pub fn fixture_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0)
            .single()
            .expect("valid fixture instant")
    }

    /// Site time `days` days before [`fixture_now`].
    pub fn days_ago(days: i64) -> SiteTime {
        (fixture_now() - chrono::Duration::days(days)).naive_utc()
    }

    /// Clock stopped at [`fixture_now`].
    pub fn fixture_clock() -> ManualClock {
        ManualClock::at(fixture_now())
    }

    /// Event payload with a fixed user and address.
    pub fn event(status: DownloadStatus, product: u64, timestamp: SiteTime) -> NewDownloadEvent {
        NewDownloadEvent::new(
            status,
            timestamp,
            ProductId(product),
            UserId(1),
            IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
            "Mozilla/5.0",
        )
    }

    /// Successful download of `product` at `timestamp`.
    pub fn success(product: u64, timestamp: SiteTime) -> NewDownloadEvent {
        event(DownloadStatus::Success, product, timestamp)
    }

    /// Configuration with caching on and the default 15 minute TTL.
    pub fn test_config() -> StatsConfig {
        StatsConfig::default()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertion helpers for statistics results.

    use super::*;

    /// Assert that a StatsResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &StatsResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a StatsResult is a Storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &StatsResult<T>) {
        match result {
            Err(StatsError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a StatsResult reports a missing event table.
    #[track_caller]
    pub fn assert_table_missing<T: std::fmt::Debug>(result: &StatsResult<T>) {
        match result {
            Err(StatsError::Storage(StorageError::TableMissing { .. })) => {}
            other => panic!("Expected TableMissing error, got: {:?}", other),
        }
    }

    /// Assert that a StatsResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &StatsResult<T>) {
        match result {
            Err(StatsError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert a report is ordered by count descending and within `limit`.
    #[track_caller]
    pub fn assert_ranked(report: &[PopularDownload], limit: u32) {
        assert!(
            report.len() <= limit as usize,
            "Report has {} rows, limit is {}",
            report.len(),
            limit
        );
        for pair in report.windows(2) {
            assert!(
                pair[0].download_count >= pair[1].download_count,
                "Report not descending: {:?} before {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_manual_clock_moves_only_when_told() {
        let clock = fixtures::fixture_clock();
        assert_eq!(clock.now(), fixtures::fixture_now());
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(
            clock.now() - fixtures::fixture_now(),
            chrono::Duration::minutes(5)
        );
        assert_eq!(clock.local_now(), fixtures::days_ago(0) + chrono::Duration::minutes(5));

        clock.set(fixtures::fixture_now());
        assert_eq!(clock.now(), fixtures::fixture_now());
    }

    #[test]
    fn test_manual_clock_site_offset() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let clock = ManualClock::with_offset(fixtures::fixture_now(), offset);
        assert_eq!(
            clock.local_now(),
            fixtures::days_ago(0) + chrono::Duration::hours(2)
        );
    }

    #[test]
    fn test_static_permissions() {
        let perms = StaticPermissions::visitor();
        assert!(!perms.is_administrator());
        perms.set_administrator(true);
        assert!(perms.is_administrator());
        assert!(StaticPermissions::administrator().is_administrator());
    }

    #[test]
    fn test_failing_cache_counts_attempts() {
        let cache = FailingCacheBackend::new();
        assert!(cache.get("k").is_err());
        assert!(cache.put("k", b"1", Utc::now()).is_err());
        assert_eq!(cache.get_attempts(), 1);
        assert_eq!(cache.put_attempts(), 1);
    }

    #[test]
    fn test_assert_ranked_accepts_sorted_report() {
        let report = vec![
            PopularDownload {
                product_id: ProductId(1),
                title: "a".into(),
                download_count: 5,
            },
            PopularDownload {
                product_id: ProductId(2),
                title: "b".into(),
                download_count: 5,
            },
        ];
        assertions::assert_ranked(&report, 2);
    }

    #[test]
    fn test_result_assertions() {
        assertions::assert_ok(&StatsResult::Ok(3u64));

        let missing: StatsResult<u64> = Err(StorageError::TableMissing {
            table: "wp_ddownload_statistics".to_string(),
        }
        .into());
        assertions::assert_storage_error(&missing);
        assertions::assert_table_missing(&missing);

        let invalid: StatsResult<u64> = StatsConfig::default()
            .with_table_prefix("no spaces")
            .validate()
            .map(|_| 0);
        assertions::assert_config_error(&invalid);
    }

    proptest! {
        #[test]
        fn prop_generated_events_fit_columns(event in generators::arb_event()) {
            prop_assert!(event.user_agent.len() <= dlstats_core::USER_AGENT_MAX_LEN);
            prop_assert_eq!(event.user_ip.as_bytes().len(), 16);
        }

        #[test]
        fn prop_times_before_end_stay_in_range(
            ts in generators::arb_site_time_before(fixtures::days_ago(0), 10)
        ) {
            prop_assert!(ts <= fixtures::days_ago(0));
            prop_assert!(ts > fixtures::days_ago(10));
        }
    }
}
