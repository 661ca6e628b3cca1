//! Interval-aligned price store.
//!
//! Persists one price sample per aligned stamp in SQLite. Stamps are aligned
//! at write time; a later insert at the same aligned stamp replaces the prior
//! value. The store grows monotonically and never deletes.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::info;

use crate::error::Result;
use crate::models::{align, PricePoint};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS price_history (
    stamp INTEGER PRIMARY KEY,
    price INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_price ON price_history(price);
"#;

/// Handle to the price history table. Cheap to clone; all clones share one
/// serialized connection.
#[derive(Clone)]
pub struct PriceStore {
    conn: Arc<Mutex<Connection>>,
    ival: u64,
}

impl PriceStore {
    /// Open or create the backing database file.
    pub fn open(db_path: &str, ival: u64) -> Result<Self> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    crate::error::OracleError::Internal(format!(
                        "failed to create database directory: {err}"
                    ))
                })?;
            }
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!(path = %db_path, ival, "price store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ival,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_memory(ival: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ival,
        })
    }

    /// Alignment interval this store was opened with.
    pub fn ival(&self) -> u64 {
        self.ival
    }

    /// Upsert a sample at the aligned stamp (last write wins).
    pub fn insert(&self, price: u64, stamp: u64) -> Result<()> {
        let aligned = align(stamp, self.ival);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO price_history (price, stamp) VALUES (?1, ?2)",
            params![price as i64, aligned as i64],
        )?;
        Ok(())
    }

    /// The sample with the maximum stamp, or None if empty.
    pub fn latest(&self) -> Result<Option<PricePoint>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT price, stamp FROM price_history ORDER BY stamp DESC LIMIT 1",
                [],
                row_to_point,
            )
            .optional()?;
        Ok(row)
    }

    /// Exact-match lookup at the aligned stamp.
    pub fn at(&self, stamp: u64) -> Result<Option<PricePoint>> {
        let aligned = align(stamp, self.ival);
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT price, stamp FROM price_history WHERE stamp = ?1",
                params![aligned as i64],
                row_to_point,
            )
            .optional()?;
        Ok(row)
    }

    /// All samples in `[align(start), align(end)]`, ascending by stamp.
    pub fn range(&self, start_stamp: u64, end_stamp: u64) -> Result<Vec<PricePoint>> {
        let start = align(start_stamp, self.ival);
        let end = align(end_stamp, self.ival);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT price, stamp FROM price_history
             WHERE stamp BETWEEN ?1 AND ?2
             ORDER BY stamp ASC",
        )?;
        let points = stmt
            .query_map(params![start as i64, end as i64], row_to_point)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(points)
    }

    /// Earliest sample in `[align(start), align(end)]` with `price < thold`
    /// (strict), or None. First match by ascending stamp, not minimum price.
    pub fn first_below(
        &self,
        thold_price: u64,
        start_stamp: u64,
        end_stamp: u64,
    ) -> Result<Option<PricePoint>> {
        let start = align(start_stamp, self.ival);
        let end = align(end_stamp, self.ival);
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT price, stamp FROM price_history
                 WHERE stamp BETWEEN ?1 AND ?2 AND price < ?3
                 ORDER BY stamp ASC
                 LIMIT 1",
                params![start as i64, end as i64, thold_price as i64],
                row_to_point,
            )
            .optional()?;
        Ok(row)
    }

    /// Number of stored samples.
    pub fn len(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM price_history", [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Min and max stored stamps, or None if empty.
    pub fn time_coverage(&self) -> Result<Option<(u64, u64)>> {
        let conn = self.conn.lock();
        let row: (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(stamp), MAX(stamp) FROM price_history",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        match row {
            (Some(min), Some(max)) => Ok(Some((min as u64, max as u64))),
            _ => Ok(None),
        }
    }
}

fn row_to_point(row: &rusqlite::Row<'_>) -> rusqlite::Result<PricePoint> {
    Ok(PricePoint {
        price: row.get::<_, i64>(0)? as u64,
        stamp: row.get::<_, i64>(1)? as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PriceStore {
        PriceStore::open_memory(300).unwrap()
    }

    #[test]
    fn test_insert_roundtrip_aligns_at_write() {
        let store = store();
        store.insert(50_000, 754).unwrap();

        // Raw stamp 754 lands on the 600 bucket; both raw and aligned queries hit.
        let point = store.at(754).unwrap().unwrap();
        assert_eq!(
            point,
            PricePoint {
                price: 50_000,
                stamp: 600
            }
        );
        assert_eq!(store.at(600).unwrap(), Some(point));
    }

    #[test]
    fn test_insert_is_last_write_wins() {
        let store = store();
        store.insert(100, 300).unwrap();
        store.insert(200, 450).unwrap(); // same aligned bucket

        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.at(300).unwrap().unwrap().price, 200);
    }

    #[test]
    fn test_empty_store() {
        let store = store();
        assert_eq!(store.latest().unwrap(), None);
        assert!(store.range(0, 10_000).unwrap().is_empty());
        assert_eq!(store.time_coverage().unwrap(), None);
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_latest_returns_max_stamp() {
        let store = store();
        store.insert(100, 0).unwrap();
        store.insert(90, 300).unwrap();
        store.insert(80, 600).unwrap();

        assert_eq!(
            store.latest().unwrap(),
            Some(PricePoint {
                price: 80,
                stamp: 600
            })
        );
    }

    #[test]
    fn test_range_is_inclusive_and_ascending() {
        let store = store();
        for (price, stamp) in [(100, 0), (90, 300), (80, 600), (70, 900)] {
            store.insert(price, stamp).unwrap();
        }

        let points = store.range(300, 600).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].stamp, 300);
        assert_eq!(points[1].stamp, 600);

        // Unaligned bounds are aligned before querying.
        let points = store.range(301, 899).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].stamp, 300);
    }

    #[test]
    fn test_first_below_returns_earliest_crossing() {
        let store = store();
        store.insert(100, 0).unwrap();
        store.insert(90, 300).unwrap();
        store.insert(80, 600).unwrap();

        let hit = store.first_below(85, 0, 600).unwrap().unwrap();
        assert_eq!((hit.price, hit.stamp), (80, 600));

        let hit = store.first_below(95, 0, 600).unwrap().unwrap();
        assert_eq!((hit.price, hit.stamp), (90, 300));

        // Earliest match wins, not the minimum price.
        let hit = store.first_below(200, 0, 600).unwrap().unwrap();
        assert_eq!((hit.price, hit.stamp), (100, 0));
    }

    #[test]
    fn test_first_below_is_strict() {
        let store = store();
        store.insert(90, 300).unwrap();

        assert_eq!(store.first_below(90, 0, 600).unwrap(), None);
        assert!(store.first_below(91, 0, 600).unwrap().is_some());
    }

    #[test]
    fn test_time_coverage() {
        let store = store();
        store.insert(100, 300).unwrap();
        store.insert(100, 900).unwrap();
        assert_eq!(store.time_coverage().unwrap(), Some((300, 900)));
    }

    #[test]
    fn test_open_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.db");
        let path = path.to_str().unwrap();

        {
            let store = PriceStore::open(path, 300).unwrap();
            store.insert(123, 600).unwrap();
        }

        let store = PriceStore::open(path, 300).unwrap();
        assert_eq!(store.at(600).unwrap().unwrap().price, 123);
    }
}
