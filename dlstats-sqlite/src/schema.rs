//! SQL templates.
//!
//! Table names come from the validated prefix and are the only interpolated
//! fragments. Every value is a bound parameter.

use dlstats_core::StatsConfig;

/// Host post status of a publicly visible product.
pub const PUBLISHED_STATUS: &str = "publish";

/// Resolved table names for one site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub statistics: String,
    pub posts: String,
    pub postmeta: String,
}

impl Tables {
    pub fn for_config(config: &StatsConfig) -> Self {
        Self {
            statistics: config.statistics_table(),
            posts: format!("{}posts", config.table_prefix),
            postmeta: format!("{}postmeta", config.table_prefix),
        }
    }

    // === Event table ===

    pub fn create_statistics(&self) -> String {
        let t = &self.statistics;
        format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                ID          INTEGER PRIMARY KEY AUTOINCREMENT,
                status      TEXT    NOT NULL DEFAULT 'success' CHECK (length(status) <= 10),
                date        TEXT    NOT NULL,
                post_id     INTEGER NOT NULL,
                user_id     INTEGER NOT NULL DEFAULT 0,
                user_ip     BLOB    NOT NULL,
                user_agent  TEXT    NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {t}_status_date ON {t} (status, date);
            CREATE INDEX IF NOT EXISTS {t}_post_id ON {t} (post_id);"
        )
    }

    pub fn drop_statistics(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.statistics)
    }

    pub fn truncate_statistics(&self) -> String {
        format!("DELETE FROM {}", self.statistics)
    }

    pub fn insert_event(&self) -> String {
        format!(
            "INSERT INTO {} (status, date, post_id, user_id, user_ip, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.statistics
        )
    }

    pub fn select_events(&self) -> String {
        format!(
            "SELECT ID, status, date, post_id, user_id, user_ip, user_agent
             FROM {} ORDER BY ID ASC",
            self.statistics
        )
    }

    /// Unfiltered count; callers append `AND ...` clauses.
    pub fn count_events(&self) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE 1 = 1", self.statistics)
    }

    /// Params: status, start date, limit.
    pub fn tally_since(&self) -> String {
        format!(
            "SELECT post_id, COUNT(ID) AS downloads
             FROM {}
             WHERE status = ?1 AND date >= ?2
             GROUP BY post_id
             ORDER BY downloads DESC, post_id ASC
             LIMIT ?3",
            self.statistics
        )
    }

    /// Oldest-first delete; `conditions` is a run of `AND ...` clauses and
    /// the final bound parameter is the row limit (`-1` for none).
    pub fn delete_events(&self, conditions: &str) -> String {
        let t = &self.statistics;
        format!(
            "DELETE FROM {t} WHERE ID IN (
                SELECT ID FROM {t}
                WHERE 1 = 1{conditions}
                ORDER BY date ASC, ID ASC
                LIMIT ?
            )"
        )
    }

    // === Counters ===

    /// Params: meta key; callers may append `AND post_id = ?`.
    pub fn sum_counters(&self) -> String {
        format!(
            "SELECT SUM(CAST(meta_value AS INTEGER)) FROM {} WHERE meta_key = ?",
            self.postmeta
        )
    }

    /// Params: meta key, product id.
    pub fn bump_counter(&self) -> String {
        format!(
            "UPDATE {}
             SET meta_value = CAST(CAST(meta_value AS INTEGER) + 1 AS TEXT)
             WHERE meta_key = ?1 AND post_id = ?2",
            self.postmeta
        )
    }

    /// Params: product id, meta key, value.
    pub fn insert_counter(&self) -> String {
        format!(
            "INSERT INTO {} (post_id, meta_key, meta_value) VALUES (?1, ?2, ?3)",
            self.postmeta
        )
    }

    /// Params: meta key, product id.
    pub fn delete_counter(&self) -> String {
        format!(
            "DELETE FROM {} WHERE meta_key = ?1 AND post_id = ?2",
            self.postmeta
        )
    }

    /// Params: meta key, product id.
    pub fn read_counter(&self) -> String {
        format!(
            "SELECT CAST(meta_value AS INTEGER) FROM {}
             WHERE meta_key = ?1 AND post_id = ?2
             ORDER BY meta_id ASC LIMIT 1",
            self.postmeta
        )
    }

    /// Params: product type, post status, meta key, limit.
    pub fn top_counters(&self) -> String {
        format!(
            "SELECT p.ID, p.post_title, CAST(m.meta_value AS INTEGER) AS downloads
             FROM {posts} p
             INNER JOIN {postmeta} m ON p.ID = m.post_id
             WHERE p.post_type = ?1
               AND p.post_status = ?2
               AND m.meta_key = ?3
             ORDER BY downloads DESC, p.ID ASC
             LIMIT ?4",
            posts = self.posts,
            postmeta = self.postmeta
        )
    }

    // === Host tables ===

    pub fn create_host_tables(&self) -> String {
        let posts = &self.posts;
        let postmeta = &self.postmeta;
        format!(
            "CREATE TABLE IF NOT EXISTS {posts} (
                ID          INTEGER PRIMARY KEY,
                post_title  TEXT NOT NULL DEFAULT '',
                post_type   TEXT NOT NULL DEFAULT 'post',
                post_status TEXT NOT NULL DEFAULT 'publish'
            );
            CREATE TABLE IF NOT EXISTS {postmeta} (
                meta_id     INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id     INTEGER NOT NULL DEFAULT 0,
                meta_key    TEXT,
                meta_value  TEXT
            );
            CREATE INDEX IF NOT EXISTS {postmeta}_post_id ON {postmeta} (post_id);
            CREATE INDEX IF NOT EXISTS {postmeta}_meta_key ON {postmeta} (meta_key);"
        )
    }

    /// Params: id, title, type, status.
    pub fn upsert_post(&self) -> String {
        format!(
            "INSERT INTO {} (ID, post_title, post_type, post_status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ID) DO UPDATE SET
                post_title = excluded.post_title,
                post_type = excluded.post_type,
                post_status = excluded.post_status",
            self.posts
        )
    }

    /// Params: id.
    pub fn post_title(&self) -> String {
        format!("SELECT post_title FROM {} WHERE ID = ?1", self.posts)
    }

    /// Params: id.
    pub fn post_status(&self) -> String {
        format!("SELECT post_status FROM {} WHERE ID = ?1", self.posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_follow_prefix() {
        let tables = Tables::for_config(&StatsConfig::default().with_table_prefix("site2_"));
        assert_eq!(tables.statistics, "site2_ddownload_statistics");
        assert_eq!(tables.posts, "site2_posts");
        assert_eq!(tables.postmeta, "site2_postmeta");
    }

    #[test]
    fn test_statements_interpolate_only_table_names() {
        let tables = Tables::for_config(&StatsConfig::default());
        let sql = tables.tally_since();
        assert!(sql.contains("FROM wp_ddownload_statistics"));
        assert!(!sql.contains("success"));

        let delete = tables.delete_events(" AND status = ?");
        assert!(delete.contains("WHERE 1 = 1 AND status = ?"));
        assert!(delete.contains("ORDER BY date ASC, ID ASC"));
    }
}
