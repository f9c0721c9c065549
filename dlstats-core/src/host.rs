//! Host platform collaborators.
//!
//! The statistics subsystem runs inside a content platform that owns the
//! product catalog, the role model and the site clock. These traits are the
//! seams through which the aggregator reaches them.

use crate::{ProductId, SiteTime};
use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};

/// Wall clock honoring the host-configured site timezone.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Offset of the site timezone from UTC.
    fn site_offset(&self) -> FixedOffset;

    /// Current site-local wall time truncated to whole seconds.
    fn local_now(&self) -> SiteTime {
        let local = self.now().with_timezone(&self.site_offset()).naive_local();
        local.with_nanosecond(0).unwrap_or(local)
    }
}

/// System clock with a fixed site offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// System clock for a site configured in UTC.
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn site_offset(&self) -> FixedOffset {
        self.offset
    }
}

/// Host product lookup.
pub trait ProductCatalog: Send + Sync {
    /// Display title of a product; empty if the product is unknown.
    fn title(&self, product_id: ProductId) -> String;

    /// Whether the product is publicly published.
    fn is_published(&self, product_id: ProductId) -> bool;
}

/// Host role check for the current caller.
pub trait PermissionCheck: Send + Sync {
    /// Whether the current caller holds the administrator capability.
    fn is_administrator(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    struct StoppedClock {
        at: DateTime<Utc>,
        offset: FixedOffset,
    }

    impl Clock for StoppedClock {
        fn now(&self) -> DateTime<Utc> {
            self.at
        }

        fn site_offset(&self) -> FixedOffset {
            self.offset
        }
    }

    #[test]
    fn test_local_now_applies_site_offset() {
        let clock = StoppedClock {
            at: Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap(),
            offset: FixedOffset::east_opt(2 * 3600).unwrap(),
        };
        let expected = NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(1, 30, 0)
            .unwrap();
        assert_eq!(clock.local_now(), expected);
    }

    #[test]
    fn test_local_now_drops_subsecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap()
            + chrono::Duration::milliseconds(750);
        let clock = StoppedClock {
            at,
            offset: FixedOffset::west_opt(5 * 3600).unwrap(),
        };
        assert_eq!(clock.local_now().nanosecond(), 0);
        assert_eq!(clock.local_now().second(), 5);
    }

    #[test]
    fn test_system_clock_defaults_to_utc() {
        assert_eq!(SystemClock::default().site_offset().local_minus_utc(), 0);
    }
}
