use chrono::NaiveDateTime;
use rusqlite::{params, Connection};

use crate::filter::LogFilter;
use crate::record::Record;
use crate::timefmt;

pub type Result<T> = std::result::Result<T, rusqlite::Error>;

const COLUMNS: &str = "ip, ident, authuser, date, request, status, bytes, referer, useragent, vhost";

/// Append-only record store over SQLite. Rows are never updated in place;
/// re-ingesting the same files without [`LogStore::reset`] is additive.
pub struct LogStore {
    conn: Connection,
}

impl LogStore {
    // Open a file-backed store (creates it if it doesn't exist)
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = LogStore { conn };
        store.init()?;
        Ok(store)
    }

    // Open an in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = LogStore { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<()> {
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY,
                ip TEXT,
                ident TEXT,
                authuser TEXT,
                date TEXT,
                request TEXT,
                status INTEGER,
                bytes INTEGER,
                referer TEXT,
                useragent TEXT,
                vhost TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_logs_date ON logs (date);
            CREATE INDEX IF NOT EXISTS idx_logs_vhost ON logs (vhost);
            "#,
        )?;
        Ok(())
    }

    /// Drop all stored records and reclaim the file space.
    pub fn reset(&self) -> Result<()> {
        self.conn.execute_batch("DROP TABLE IF EXISTS logs; VACUUM;")?;
        self.init()
    }

    /// Insert all records in one transaction. Either the whole batch becomes
    /// visible or, on error, none of it does.
    pub fn insert_batch(&mut self, records: &[Record]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO logs (ip, ident, authuser, date, request, status, bytes, referer, useragent, vhost)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for record in records {
                stmt.execute(params![
                    record.ip,
                    record.ident,
                    record.authuser,
                    timefmt::format_storage(record.timestamp),
                    record.request,
                    record.status,
                    record.bytes,
                    record.referer,
                    record.useragent,
                    record.vhost,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Run a filtered query. Results always come back ordered by timestamp
    /// ascending; the report generator depends on that.
    pub fn select(&self, filter: &LogFilter) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {} FROM logs{} ORDER BY date ASC",
            COLUMNS,
            filter.where_clause()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(filter.params()), |row| {
            Ok(Record {
                ip: row.get(0)?,
                ident: row.get(1)?,
                authuser: row.get(2)?,
                timestamp: row.get::<_, NaiveDateTime>(3)?.and_utc(),
                request: row.get(4)?,
                status: row.get(5)?,
                bytes: row.get(6)?,
                referer: row.get(7)?,
                useragent: row.get(8)?,
                vhost: row.get(9)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Berlin;

    fn record(vhost: &str, clf_time: &str, status: u16, bytes: Option<u64>) -> Record {
        Record {
            vhost: vhost.into(),
            ip: "203.0.113.5".into(),
            ident: "-".into(),
            authuser: "-".into(),
            timestamp: timefmt::parse_clf(clf_time).unwrap(),
            request: "GET / HTTP/1.1".into(),
            status,
            bytes,
            referer: "-".into(),
            useragent: "curl/8.0".into(),
        }
    }

    #[test]
    fn test_insert_and_select_round_trip() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        let original = record("site1", "10/Jan/2024:12:00:00 +0100", 200, Some(512));
        store.insert_batch(std::slice::from_ref(&original))?;

        let records = store.select(&LogFilter::default())?;
        assert_eq!(records, vec![original]);
        Ok(())
    }

    #[test]
    fn test_select_orders_by_timestamp_ascending() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        store.insert_batch(&[
            record("b", "12/Mar/2024:08:00:00 +0000", 200, None),
            record("a", "10/Jan/2024:12:00:00 +0100", 200, None),
            record("c", "01/Feb/2024:00:00:00 +0200", 200, None),
        ])?;

        let records = store.select(&LogFilter::default())?;
        let vhosts: Vec<&str> = records.iter().map(|r| r.vhost.as_str()).collect();
        assert_eq!(vhosts, ["a", "c", "b"]);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Ok(())
    }

    #[test]
    fn test_date_range_and_vhost_filter() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        store.insert_batch(&[
            record("site1", "10/Jan/2024:12:00:00 +0100", 200, Some(512)),
            record("site2", "10/Jan/2024:13:00:00 +0100", 200, None),
            record("site1", "11/Jan/2024:12:00:00 +0100", 200, None),
        ])?;

        let filter = LogFilter::default()
            .date_range("2024-01-10 00:00:00", "2024-01-10 23:59:59", Berlin)
            .unwrap()
            .vhosts("site1");
        let records = store.select(&filter)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vhost, "site1");
        assert_eq!(records[0].bytes, Some(512));
        Ok(())
    }

    #[test]
    fn test_injection_attempt_in_vhost_matches_nothing() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        store.insert_batch(&[record("site1", "10/Jan/2024:12:00:00 +0100", 200, None)])?;

        let filter = LogFilter::default().vhosts("site1' OR '1'='1");
        assert!(store.select(&filter)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_raw_condition_filters() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        store.insert_batch(&[
            record("site1", "10/Jan/2024:12:00:00 +0100", 200, None),
            record("site1", "10/Jan/2024:12:01:00 +0100", 404, None),
        ])?;

        let filter = LogFilter::default().raw("status = 404");
        let records = store.select(&filter)?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, 404);
        Ok(())
    }

    #[test]
    fn test_reingest_is_additive_and_reset_clears() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        let batch = vec![record("site1", "10/Jan/2024:12:00:00 +0100", 200, None)];
        store.insert_batch(&batch)?;
        store.insert_batch(&batch)?;
        assert_eq!(store.select(&LogFilter::default())?.len(), 2);

        store.reset()?;
        assert!(store.select(&LogFilter::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_absent_bytes_survive_storage() -> Result<()> {
        let mut store = LogStore::open_in_memory()?;
        store.insert_batch(&[record("site1", "10/Jan/2024:12:00:00 +0100", 200, None)])?;
        let records = store.select(&LogFilter::default())?;
        assert_eq!(records[0].bytes, None);
        Ok(())
    }
}
