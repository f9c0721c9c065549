//! dlstats Core - Entity Types
//!
//! Pure data structures shared by every dlstats crate: download events,
//! product identities, query shapes, configuration and errors. No I/O lives
//! here.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

pub mod config;
pub mod enums;
pub mod error;
pub mod host;
pub mod query;

pub use config::{
    is_sql_identifier_fragment, StatsConfig, DEFAULT_CACHE_TTL_SECS, DEFAULT_POPULAR_LIMIT,
    STATISTICS_TABLE_SUFFIX,
};
pub use enums::{AdminOutcome, DownloadStatus, DownloadStatusParseError};
pub use error::{CacheError, ConfigError, StatsError, StatsResult, StorageError};
pub use host::{Clock, PermissionCheck, ProductCatalog, SystemClock};
pub use query::{CountQuery, DeleteFilter, DownloadWindow, LogFilter, PopularQuery};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Site-local wall time with second precision.
///
/// Event timestamps are recorded in the host's configured timezone, so they
/// are kept naive and compared as such.
pub type SiteTime = NaiveDateTime;

/// Storage format of a [`SiteTime`]. Lexical order equals chronological order.
pub const SITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Maximum stored length of a user agent, in bytes.
pub const USER_AGENT_MAX_LEN: usize = 255;

/// Render a site time in storage format.
pub fn format_site_time(t: &SiteTime) -> String {
    t.format(SITE_TIME_FORMAT).to_string()
}

/// Parse a site time from storage format.
pub fn parse_site_time(s: &str) -> Option<SiteTime> {
    NaiveDateTime::parse_from_str(s, SITE_TIME_FORMAT).ok()
}

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Engine-assigned identifier of an event row.
    EventId
);
row_id!(
    /// Host identifier of a downloadable product.
    ProductId
);
row_id!(
    /// Host identifier of a user; `0` is anonymous.
    UserId
);

impl UserId {
    pub const ANONYMOUS: UserId = UserId(0);

    pub fn is_anonymous(self) -> bool {
        self.0 == 0
    }
}

/// Fixed-width binary IP address.
///
/// IPv4 addresses are stored IPv4-mapped so every value is 16 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIp([u8; 16]);

impl UserIp {
    pub fn from_octets(octets: [u8; 16]) -> Self {
        Self(octets)
    }

    /// Decode from a stored blob. Accepts 16-byte and legacy 4-byte forms.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Some(Self(octets))
            }
            4 => {
                let v4 = std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
                Some(Self(v4.to_ipv6_mapped().octets()))
            }
            _ => None,
        }
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_ip_addr(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.0);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }
}

impl From<IpAddr> for UserIp {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self(v4.to_ipv6_mapped().octets()),
            IpAddr::V6(v6) => Self(v6.octets()),
        }
    }
}

impl fmt::Display for UserIp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ip_addr())
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// One recorded download attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEvent {
    pub id: EventId,
    pub status: DownloadStatus,
    pub timestamp: SiteTime,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub user_ip: UserIp,
    pub user_agent: String,
}

/// Insert payload for a download event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDownloadEvent {
    pub status: DownloadStatus,
    pub timestamp: SiteTime,
    pub product_id: ProductId,
    pub user_id: UserId,
    pub user_ip: UserIp,
    pub user_agent: String,
}

impl NewDownloadEvent {
    /// Build an event payload, truncating the timestamp to whole seconds and
    /// the user agent to [`USER_AGENT_MAX_LEN`] bytes.
    pub fn new(
        status: DownloadStatus,
        timestamp: SiteTime,
        product_id: ProductId,
        user_id: UserId,
        user_ip: impl Into<UserIp>,
        user_agent: &str,
    ) -> Self {
        Self {
            status,
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
            product_id,
            user_id,
            user_ip: user_ip.into(),
            user_agent: truncate_on_char_boundary(user_agent, USER_AGENT_MAX_LEN).to_string(),
        }
    }

    /// Attach the engine-assigned id.
    pub fn into_event(self, id: EventId) -> DownloadEvent {
        DownloadEvent {
            id,
            status: self.status,
            timestamp: self.timestamp,
            product_id: self.product_id,
            user_id: self.user_id,
            user_ip: self.user_ip,
            user_agent: self.user_agent,
        }
    }
}

fn truncate_on_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// AGGREGATES
// ============================================================================

/// Per-product event count, as grouped by the event store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTally {
    pub product_id: ProductId,
    pub downloads: u64,
}

/// One row of a popular-downloads report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularDownload {
    pub product_id: ProductId,
    pub title: String,
    pub download_count: u64,
}

// ============================================================================
// TESTS
// ============================================================================
