//! Query shapes accepted by the aggregator and the storage layer.

use crate::{DownloadStatus, ProductId, SiteTime};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Which source of truth answers a count.
///
/// `AllTime` is served from the per-product counters; a bounded window can
/// only be answered from the event rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadWindow {
    AllTime,
    Since(SiteTime),
}

impl DownloadWindow {
    /// Resolve a "last N days" request against the current site time.
    /// `days == 0` means all time. A start before the earliest
    /// representable time is clamped to it.
    pub fn from_days(days: u32, local_now: SiteTime) -> Self {
        if days == 0 {
            return DownloadWindow::AllTime;
        }
        let start = Duration::try_days(i64::from(days))
            .and_then(|span| local_now.checked_sub_signed(span))
            .unwrap_or(NaiveDateTime::MIN);
        DownloadWindow::Since(start)
    }

    pub fn start(&self) -> Option<SiteTime> {
        match self {
            DownloadWindow::AllTime => None,
            DownloadWindow::Since(start) => Some(*start),
        }
    }
}

/// Arguments of a download count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountQuery {
    /// Look back this many days; 0 counts all time (default: 0).
    pub days: u32,
    /// Restrict to one product; `None` or product 0 counts every product
    /// (default: None).
    pub product_id: Option<ProductId>,
    /// Serve a live cached result if one exists (default: true).
    pub use_cache: bool,
}

impl Default for CountQuery {
    fn default() -> Self {
        Self {
            days: 0,
            product_id: None,
            use_cache: true,
        }
    }
}

impl CountQuery {
    pub fn days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    pub fn product(mut self, product_id: ProductId) -> Self {
        self.product_id = Some(product_id).filter(|id| id.get() != 0);
        self
    }

    pub fn uncached(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Product restriction with product 0 read as "all products".
    pub fn product_filter(&self) -> Option<ProductId> {
        self.product_id.filter(|id| id.get() != 0)
    }
}

/// Arguments of a popular-downloads report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularQuery {
    /// Look back this many days; 0 ranks by all-time counters (default: 0).
    pub days: u32,
    /// Maximum rows returned; `None` takes the configured
    /// `popular_limit` (default: None).
    pub limit: Option<u32>,
    /// Serve a live cached result if one exists (default: true).
    pub use_cache: bool,
}

impl Default for PopularQuery {
    fn default() -> Self {
        Self {
            days: 0,
            limit: None,
            use_cache: true,
        }
    }
}

impl PopularQuery {
    pub fn days(mut self, days: u32) -> Self {
        self.days = days;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Row limit, falling back to `default` when none was given.
    pub fn limit_or(&self, default: u32) -> u32 {
        self.limit.unwrap_or(default)
    }

    pub fn uncached(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Filter for counting event rows. Every field is optional and the present
/// ones are ANDed. Both date bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LogFilter {
    pub product_id: Option<ProductId>,
    pub start: Option<SiteTime>,
    pub end: Option<SiteTime>,
    pub status: Option<DownloadStatus>,
}

impl LogFilter {
    /// True if a row with these fields would be counted.
    pub fn matches(
        &self,
        status: DownloadStatus,
        timestamp: SiteTime,
        product_id: ProductId,
    ) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.product_id.map_or(true, |p| p == product_id)
            && self.start.map_or(true, |start| timestamp >= start)
            && self.end.map_or(true, |end| timestamp <= end)
    }
}

/// Filter for retention deletes. Date bounds are exclusive; rows are
/// removed oldest first, at most `limit` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeleteFilter {
    pub start: Option<SiteTime>,
    pub end: Option<SiteTime>,
    pub limit: Option<u64>,
    pub status: Option<DownloadStatus>,
}

impl DeleteFilter {
    /// Delete everything strictly older than `cutoff`.
    pub fn older_than(cutoff: SiteTime) -> Self {
        Self {
            end: Some(cutoff),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_status(mut self, status: DownloadStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// True if a row is eligible for deletion (ignoring `limit`).
    pub fn matches(&self, status: DownloadStatus, timestamp: SiteTime) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.start.map_or(true, |start| timestamp > start)
            && self.end.map_or(true, |end| timestamp < end)
    }
}
