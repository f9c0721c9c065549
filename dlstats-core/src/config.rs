//! Configuration types

use crate::{ConfigError, StatsError, StatsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base name of the event table; the configured prefix is prepended.
pub const STATISTICS_TABLE_SUFFIX: &str = "ddownload_statistics";

/// Default TTL for cached query results (15 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;

/// Default number of rows returned by popular-download queries.
pub const DEFAULT_POPULAR_LIMIT: u32 = 5;

/// Statistics subsystem configuration.
///
/// Every field has a documented default; `from_env` overlays environment
/// variables on top of those defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Host table prefix (default: `wp_`). Interpolated into SQL, so it is
    /// restricted to ASCII alphanumerics and underscores.
    pub table_prefix: String,
    /// Whether query results are cached at all (default: true).
    pub cache_enabled: bool,
    /// Lifetime of a cached query result (default: 15 minutes).
    pub cache_ttl: Duration,
    /// Prefix for every cache key (default: `dedo_`).
    pub cache_prefix: String,
    /// Product attribute holding the all-time counter (default: `_dedo_file_count`).
    pub counter_meta_key: String,
    /// Host record type of downloadable products (default: `dedo_download`).
    pub product_type: String,
    /// Default `limit` for popular-download queries (default: 5).
    pub popular_limit: u32,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            table_prefix: "wp_".to_string(),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            cache_prefix: "dedo_".to_string(),
            counter_meta_key: "_dedo_file_count".to_string(),
            product_type: "dedo_download".to_string(),
            popular_limit: DEFAULT_POPULAR_LIMIT,
        }
    }
}

impl StatsConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `DLSTATS_TABLE_PREFIX`: Host table prefix (default: `wp_`)
    /// - `DLSTATS_CACHE_ENABLED`: `false` disables caching (default: true)
    /// - `DLSTATS_CACHE_TTL_SECS`: Cache entry lifetime (default: 900)
    /// - `DLSTATS_CACHE_PREFIX`: Cache key prefix (default: `dedo_`)
    /// - `DLSTATS_COUNTER_META_KEY`: Counter attribute key (default: `_dedo_file_count`)
    /// - `DLSTATS_PRODUCT_TYPE`: Product record type (default: `dedo_download`)
    /// - `DLSTATS_POPULAR_LIMIT`: Default popular limit (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            table_prefix: std::env::var("DLSTATS_TABLE_PREFIX")
                .unwrap_or(defaults.table_prefix),
            cache_enabled: std::env::var("DLSTATS_CACHE_ENABLED")
                .ok()
                .map(|s| s.to_lowercase() != "false")
                .unwrap_or(defaults.cache_enabled),
            cache_ttl: std::env::var("DLSTATS_CACHE_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_prefix: std::env::var("DLSTATS_CACHE_PREFIX")
                .unwrap_or(defaults.cache_prefix),
            counter_meta_key: std::env::var("DLSTATS_COUNTER_META_KEY")
                .unwrap_or(defaults.counter_meta_key),
            product_type: std::env::var("DLSTATS_PRODUCT_TYPE")
                .unwrap_or(defaults.product_type),
            popular_limit: std::env::var("DLSTATS_POPULAR_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.popular_limit),
        }
    }

    /// Set the table prefix.
    pub fn with_table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Set the cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Enable or disable result caching.
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Fully-qualified event table name.
    pub fn statistics_table(&self) -> String {
        format!("{}{}", self.table_prefix, STATISTICS_TABLE_SUFFIX)
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(StatsError::Config) if invalid.
    ///
    /// Validates:
    /// - table_prefix contains only [A-Za-z0-9_]
    /// - cache_ttl > 0
    /// - cache_prefix, counter_meta_key and product_type are non-empty
    pub fn validate(&self) -> StatsResult<()> {
        if !is_sql_identifier_fragment(&self.table_prefix) {
            return Err(invalid(
                "table_prefix",
                &self.table_prefix,
                "table_prefix may only contain ASCII letters, digits and underscores",
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(invalid(
                "cache_ttl",
                &format!("{:?}", self.cache_ttl),
                "cache_ttl must be positive",
            ));
        }

        for (field, value) in [
            ("cache_prefix", &self.cache_prefix),
            ("counter_meta_key", &self.counter_meta_key),
            ("product_type", &self.product_type),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, value, "must not be empty"));
            }
        }

        Ok(())
    }
}

/// True if `s` can be spliced into an SQL identifier without quoting.
pub fn is_sql_identifier_fragment(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(field: &str, value: &str, reason: &str) -> StatsError {
    StatsError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
