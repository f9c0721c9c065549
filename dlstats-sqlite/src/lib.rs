//! dlstats SQLite - Relational Storage
//!
//! [`StatisticsStorage`] over a single SQLite connection. Events live in
//! `{prefix}ddownload_statistics`; counters are rows of the host's
//! `{prefix}postmeta` attribute table, joined against `{prefix}posts` for
//! ranking and titles.

pub mod schema;

pub use schema::{Tables, PUBLISHED_STATUS};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use dlstats_core::{
    format_site_time, parse_site_time, DeleteFilter, DownloadEvent, DownloadStatus, EventId,
    LogFilter, NewDownloadEvent, PopularDownload, ProductCatalog, ProductId, ProductTally,
    SiteTime, StatsConfig, StatsError, StatsResult, StorageError, UserId, UserIp,
};
use dlstats_storage::StatisticsStorage;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, warn};

/// SQLite-backed statistics storage.
///
/// All statements run on one connection behind a mutex, so calls from
/// different threads are serialized.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    tables: Tables,
    counter_meta_key: String,
    product_type: String,
}

impl SqliteStorage {
    /// Open (or create) a database file in WAL mode.
    pub fn open<P: AsRef<Path>>(path: P, config: &StatsConfig) -> StatsResult<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| StorageError::query("open", e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StorageError::query("open", e))?;
        Self::from_connection(conn, config)
    }

    /// Private in-memory database.
    pub fn in_memory(config: &StatsConfig) -> StatsResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| StorageError::query("open", e))?;
        Self::from_connection(conn, config)
    }

    /// Wrap an existing connection. The configuration is validated first
    /// because its prefix is spliced into every statement.
    pub fn from_connection(conn: Connection, config: &StatsConfig) -> StatsResult<Self> {
        config.validate()?;
        Ok(Self {
            conn: Mutex::new(conn),
            tables: Tables::for_config(config),
            counter_meta_key: config.counter_meta_key.clone(),
            product_type: config.product_type.clone(),
        })
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Create the host `posts` and `postmeta` tables if they are missing.
    ///
    /// A real host owns these; this exists for standalone deployments and
    /// tests.
    pub fn install_host_schema(&self) -> StatsResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.tables.create_host_tables())
            .map_err(db_err("install_host_schema"))?;
        debug!(posts = %self.tables.posts, postmeta = %self.tables.postmeta, "host tables ready");
        Ok(())
    }

    /// Insert or update a download product record.
    pub fn upsert_product(
        &self,
        product_id: ProductId,
        title: &str,
        published: bool,
    ) -> StatsResult<()> {
        let status = if published { PUBLISHED_STATUS } else { "draft" };
        let conn = self.lock()?;
        conn.execute(
            &self.tables.upsert_post(),
            params![to_sql_int(product_id.get()), title, self.product_type, status],
        )
        .map_err(db_err("upsert_product"))?;
        Ok(())
    }

    /// Overwrite a product's counter.
    pub fn set_counter(&self, product_id: ProductId, count: u64) -> StatsResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("set_counter"))?;
        tx.execute(
            &self.tables.delete_counter(),
            params![self.counter_meta_key, to_sql_int(product_id.get())],
        )
        .map_err(db_err("set_counter"))?;
        tx.execute(
            &self.tables.insert_counter(),
            params![to_sql_int(product_id.get()), self.counter_meta_key, count.to_string()],
        )
        .map_err(db_err("set_counter"))?;
        tx.commit().map_err(db_err("set_counter"))?;
        Ok(())
    }

    /// Every stored event in id order, decoded from its columns.
    ///
    /// A row whose status, date or address cannot be decoded fails the
    /// whole read.
    pub fn events(&self) -> StatsResult<Vec<DownloadEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&self.tables.select_events())
            .map_err(db_err("events"))?;
        let rows = stmt
            .query_map([], |row| -> rusqlite::Result<EventRow> {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(db_err("events"))?;
        let events: StatsResult<Vec<DownloadEvent>> = rows
            .map(|row| row.map_err(db_err("events")).and_then(decode_event))
            .collect();
        events
    }

    fn lock(&self) -> StatsResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StatsError::Storage(StorageError::LockPoisoned))
    }
}

/// Map a driver error, recognising a missing table.
fn db_err(operation: &'static str) -> impl Fn(rusqlite::Error) -> StatsError {
    move |e| {
        let message = e.to_string();
        match message.strip_prefix("no such table: ") {
            Some(table) => StorageError::TableMissing {
                table: table.to_string(),
            },
            None => StorageError::query(operation, message),
        }
        .into()
    }
}

/// Raw event columns in `select_events` order.
type EventRow = (i64, String, String, i64, i64, Vec<u8>, String);

fn decode_event(row: EventRow) -> StatsResult<DownloadEvent> {
    let (id, status, date, post_id, user_id, user_ip, user_agent) = row;
    let status = DownloadStatus::from_db_str(&status).map_err(|e| StorageError::query("events", e))?;
    let timestamp = parse_site_time(&date)
        .ok_or_else(|| StorageError::query("events", format!("unparseable date: {date}")))?;
    let user_ip = UserIp::from_slice(&user_ip).ok_or_else(|| {
        StorageError::query("events", format!("user_ip has {} bytes", user_ip.len()))
    })?;
    Ok(DownloadEvent {
        id: EventId(from_sql_int(id)),
        status,
        timestamp,
        product_id: ProductId(from_sql_int(post_id)),
        user_id: UserId(from_sql_int(user_id)),
        user_ip,
        user_agent,
    })
}

fn to_sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn from_sql_int(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

impl StatisticsStorage for SqliteStorage {
    // === Event Table Lifecycle ===

    fn setup_table(&self) -> StatsResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.tables.create_statistics())
            .map_err(db_err("setup_table"))
    }

    fn drop_table(&self) -> StatsResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(&self.tables.drop_statistics())
            .map_err(db_err("drop_table"))
    }

    fn table_exists(&self) -> StatsResult<bool> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![self.tables.statistics],
                |row| row.get(0),
            )
            .map_err(db_err("table_exists"))?;
        Ok(count > 0)
    }

    fn truncate(&self) -> StatsResult<u64> {
        let conn = self.lock()?;
        let removed = conn
            .execute(&self.tables.truncate_statistics(), [])
            .map_err(db_err("truncate"))?;
        Ok(removed as u64)
    }

    // === Event Operations ===

    fn insert_event(&self, event: &NewDownloadEvent) -> StatsResult<EventId> {
        let conn = self.lock()?;
        conn.execute(
            &self.tables.insert_event(),
            params![
                event.status.as_db_str(),
                format_site_time(&event.timestamp),
                to_sql_int(event.product_id.get()),
                to_sql_int(event.user_id.get()),
                event.user_ip.as_bytes(),
                event.user_agent,
            ],
        )
        .map_err(db_err("insert_event"))?;
        Ok(EventId(from_sql_int(conn.last_insert_rowid())))
    }

    fn count_events(&self, filter: &LogFilter) -> StatsResult<u64> {
        let mut sql = self.tables.count_events();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            values.push(Value::Text(status.as_db_str().to_string()));
        }
        if let Some(product_id) = filter.product_id {
            sql.push_str(" AND post_id = ?");
            values.push(Value::Integer(to_sql_int(product_id.get())));
        }
        if let Some(start) = filter.start {
            sql.push_str(" AND date >= ?");
            values.push(Value::Text(format_site_time(&start)));
        }
        if let Some(end) = filter.end {
            sql.push_str(" AND date <= ?");
            values.push(Value::Text(format_site_time(&end)));
        }

        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .map_err(db_err("count_events"))?;
        Ok(from_sql_int(count))
    }

    fn tally_since(
        &self,
        status: DownloadStatus,
        start: SiteTime,
        limit: u32,
    ) -> StatsResult<Vec<ProductTally>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&self.tables.tally_since())
            .map_err(db_err("tally_since"))?;
        let rows = stmt
            .query_map(
                params![status.as_db_str(), format_site_time(&start), i64::from(limit)],
                |row| {
                    Ok(ProductTally {
                        product_id: ProductId(from_sql_int(row.get(0)?)),
                        downloads: from_sql_int(row.get(1)?),
                    })
                },
            )
            .map_err(db_err("tally_since"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_err("tally_since"))
    }

    fn delete_events(&self, filter: &DeleteFilter) -> StatsResult<u64> {
        let mut conditions = String::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(start) = filter.start {
            conditions.push_str(" AND date > ?");
            values.push(Value::Text(format_site_time(&start)));
        }
        if let Some(end) = filter.end {
            conditions.push_str(" AND date < ?");
            values.push(Value::Text(format_site_time(&end)));
        }
        if let Some(status) = filter.status {
            conditions.push_str(" AND status = ?");
            values.push(Value::Text(status.as_db_str().to_string()));
        }
        values.push(Value::Integer(filter.limit.map_or(-1, to_sql_int)));

        let conn = self.lock()?;
        let deleted = conn
            .execute(
                &self.tables.delete_events(&conditions),
                params_from_iter(values.iter()),
            )
            .map_err(db_err("delete_events"))?;
        Ok(deleted as u64)
    }

    // === Counter Operations ===

    fn sum_counters(&self, product_id: Option<ProductId>) -> StatsResult<Option<u64>> {
        let mut sql = self.tables.sum_counters();
        let mut values = vec![Value::Text(self.counter_meta_key.clone())];
        if let Some(id) = product_id {
            sql.push_str(" AND post_id = ?");
            values.push(Value::Integer(to_sql_int(id.get())));
        }

        let conn = self.lock()?;
        let sum: Option<i64> = conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
            .map_err(db_err("sum_counters"))?;
        Ok(sum.map(from_sql_int))
    }

    fn increment_counter(&self, product_id: ProductId) -> StatsResult<u64> {
        let id = to_sql_int(product_id.get());
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("increment_counter"))?;

        let bumped = tx
            .execute(&self.tables.bump_counter(), params![self.counter_meta_key, id])
            .map_err(db_err("increment_counter"))?;
        if bumped == 0 {
            tx.execute(
                &self.tables.insert_counter(),
                params![id, self.counter_meta_key, "1"],
            )
            .map_err(db_err("increment_counter"))?;
        }
        let value: i64 = tx
            .query_row(
                &self.tables.read_counter(),
                params![self.counter_meta_key, id],
                |row| row.get(0),
            )
            .map_err(db_err("increment_counter"))?;

        tx.commit().map_err(db_err("increment_counter"))?;
        Ok(from_sql_int(value))
    }

    fn top_counters(&self, limit: u32) -> StatsResult<Vec<PopularDownload>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&self.tables.top_counters())
            .map_err(db_err("top_counters"))?;
        let rows = stmt
            .query_map(
                params![
                    self.product_type,
                    PUBLISHED_STATUS,
                    self.counter_meta_key,
                    i64::from(limit)
                ],
                |row| {
                    Ok(PopularDownload {
                        product_id: ProductId(from_sql_int(row.get(0)?)),
                        title: row.get(1)?,
                        download_count: row.get::<_, Option<i64>>(2)?.map_or(0, from_sql_int),
                    })
                },
            )
            .map_err(db_err("top_counters"))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(db_err("top_counters"))
    }
}

impl ProductCatalog for SqliteStorage {
    fn title(&self, product_id: ProductId) -> String {
        let lookup = || -> StatsResult<Option<String>> {
            let conn = self.lock()?;
            conn.query_row(
                &self.tables.post_title(),
                params![to_sql_int(product_id.get())],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("title"))
        };
        match lookup() {
            Ok(title) => title.unwrap_or_default(),
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "product title lookup failed");
                String::new()
            }
        }
    }

    fn is_published(&self, product_id: ProductId) -> bool {
        let lookup = || -> StatsResult<Option<String>> {
            let conn = self.lock()?;
            conn.query_row(
                &self.tables.post_status(),
                params![to_sql_int(product_id.get())],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("is_published"))
        };
        match lookup() {
            Ok(status) => status.as_deref() == Some(PUBLISHED_STATUS),
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "product status lookup failed");
                false
            }
        }
    }
}
