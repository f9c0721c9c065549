//! Cache keys derived from query shapes.
//!
//! A cached result is addressed by the operation that produced it plus every
//! parameter that influenced it. Two calls with the same shape share an
//! entry; any differing parameter yields a different key.

use dlstats_core::ProductId;
use std::fmt;

/// Shape of a cacheable query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Result of a download count.
    DownloadCount {
        days: u32,
        product_id: Option<ProductId>,
    },
    /// Result of a popular-downloads report.
    Popular { days: u32, limit: u32 },
}

impl CacheKey {
    pub fn download_count(days: u32, product_id: Option<ProductId>) -> Self {
        CacheKey::DownloadCount { days, product_id }
    }

    pub fn popular(days: u32, limit: u32) -> Self {
        CacheKey::Popular { days, limit }
    }

    /// Operation name embedded in the encoded key.
    pub fn operation(&self) -> &'static str {
        match self {
            CacheKey::DownloadCount { .. } => "downloads",
            CacheKey::Popular { .. } => "popular",
        }
    }

    /// Encode to the backend key string.
    ///
    /// Format:
    /// - `{prefix}downloads_days{days}id{product_id}` (product 0 = all)
    /// - `{prefix}popular_days{days}limit{limit}`
    pub fn encode(&self, prefix: &str) -> String {
        match self {
            CacheKey::DownloadCount { days, product_id } => format!(
                "{prefix}{}_days{days}id{}",
                self.operation(),
                product_id.map_or(0, ProductId::get)
            ),
            CacheKey::Popular { days, limit } => {
                format!("{prefix}{}_days{days}limit{limit}", self.operation())
            }
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_count_key_format() {
        let key = CacheKey::download_count(7, Some(ProductId(42)));
        assert_eq!(key.encode("dedo_"), "dedo_downloads_days7id42");
    }

    #[test]
    fn test_all_products_encode_as_zero() {
        let key = CacheKey::download_count(0, None);
        assert_eq!(key.encode("dedo_"), "dedo_downloads_days0id0");
    }

    #[test]
    fn test_popular_key_format() {
        let key = CacheKey::popular(30, 10);
        assert_eq!(key.encode("dedo_"), "dedo_popular_days30limit10");
        assert_eq!(key.to_string(), "popular_days30limit10");
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Distinct query shapes never collide on the same key.
        #[test]
        fn prop_distinct_shapes_distinct_keys(
            a_days in 0u32..400, a_id in proptest::option::of(1u64..1000),
            b_days in 0u32..400, b_id in proptest::option::of(1u64..1000),
        ) {
            let a = CacheKey::download_count(a_days, a_id.map(ProductId));
            let b = CacheKey::download_count(b_days, b_id.map(ProductId));
            prop_assert_eq!(a == b, a.encode("p_") == b.encode("p_"));
        }

        /// Count keys and popular keys live in disjoint namespaces.
        #[test]
        fn prop_operations_do_not_collide(days in 0u32..400, n in 0u32..1000) {
            let count = CacheKey::download_count(days, Some(ProductId(u64::from(n))));
            let popular = CacheKey::popular(days, n);
            prop_assert_ne!(count.encode(""), popular.encode(""));
        }
    }
}
