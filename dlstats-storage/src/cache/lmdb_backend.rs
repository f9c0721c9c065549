//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep cached query results
//! in a memory-mapped file shared by every process serving the site.
//!
//! # Value Format
//!
//! Each value is `[cached_at millis: 8 bytes little-endian][payload]`.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`
//! - Write transactions for `put`, `delete` and `prune`
//! - Statistics are tracked behind a `RwLock`

use std::path::Path;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use dlstats_core::CacheError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::{CacheBackend, CacheResult, CacheStats, CachedEntry};

const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::Backend {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed result cache.
///
/// # Example
///
/// ```ignore
/// use dlstats_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/var/cache/dlstats", 64)?;
/// backend.put("dedo_downloads_days0id0", b"118", Utc::now())?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Hit/miss/eviction counters.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per backend and the
        // directory is owned by this cache.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        let backend = Self {
            env,
            db,
            stats: RwLock::new(CacheStats::default()),
        };
        backend.refresh_entry_count()?;
        Ok(backend)
    }

    fn encode_value(bytes: &[u8], cached_at: DateTime<Utc>) -> Vec<u8> {
        let mut full = Vec::with_capacity(TIMESTAMP_LEN + bytes.len());
        full.extend_from_slice(&cached_at.timestamp_millis().to_le_bytes());
        full.extend_from_slice(bytes);
        full
    }

    fn decode_value(raw: &[u8]) -> Result<CachedEntry, LmdbCacheError> {
        if raw.len() < TIMESTAMP_LEN {
            return Err(LmdbCacheError::Corrupt(format!(
                "value has {} bytes, header needs {}",
                raw.len(),
                TIMESTAMP_LEN
            )));
        }
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&raw[..TIMESTAMP_LEN]);
        let cached_at = DateTime::from_timestamp_millis(i64::from_le_bytes(ts))
            .ok_or_else(|| LmdbCacheError::Corrupt("timestamp out of range".to_string()))?;
        Ok(CachedEntry {
            bytes: raw[TIMESTAMP_LEN..].to_vec(),
            cached_at,
        })
    }

    fn refresh_entry_count(&self) -> Result<(), LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let count = self.db.len(&rtxn).map_err(txn_err)?;
        if let Ok(mut stats) = self.stats.write() {
            stats.entry_count = count;
        }
        Ok(())
    }

    fn record(&self, hit: bool) {
        if let Ok(mut stats) = self.stats.write() {
            if hit {
                stats.hits += 1;
            } else {
                stats.misses += 1;
            }
        }
    }
}

impl CacheBackend for LmdbCacheBackend {
    fn get(&self, key: &str) -> CacheResult<Option<CachedEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;

        match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(raw) => {
                self.record(true);
                Ok(Some(Self::decode_value(raw)?))
            }
            None => {
                self.record(false);
                Ok(None)
            }
        }
    }

    fn put(&self, key: &str, bytes: &[u8], cached_at: DateTime<Utc>) -> CacheResult<()> {
        let value = Self::encode_value(bytes, cached_at);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &value)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.refresh_entry_count()?;
        if let Ok(mut stats) = self.stats.write() {
            stats.memory_bytes += (key.len() + value.len()) as u64;
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        self.refresh_entry_count()?;
        Ok(deleted)
    }

    fn prune(&self, cached_before: DateTime<Utc>) -> CacheResult<u64> {
        let expired: Vec<Vec<u8>> = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            let iter = self.db.iter(&rtxn).map_err(txn_err)?;
            let mut keys = Vec::new();
            for item in iter {
                let (key, raw) = item.map_err(txn_err)?;
                // Undecodable values can never be served, so they go too.
                let stale = Self::decode_value(raw)
                    .map(|entry| entry.cached_at < cached_before)
                    .unwrap_or(true);
                if stale {
                    keys.push(key.to_vec());
                }
            }
            keys
        };

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;

        self.refresh_entry_count()?;
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += deleted;
        }
        Ok(deleted)
    }

    fn stats(&self) -> CacheStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }
}
