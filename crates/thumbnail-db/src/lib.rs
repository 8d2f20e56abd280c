//! SQLite persistence layer for Leafview thumbnails.
//!
//! One database file holds every thumbnail ever generated, keyed by the
//! structural hash of the source entry:
//!   ~/.cache/leafview/thumbs.db
//!
//! Two tables: `property` (format version and other scalar settings) and
//! `thumbs` (key → encoded image blob, with byte size and save date).
//!
//! Uses WAL mode for durable, cheap commits. Callers share one connection
//! behind a mutex, so a lookup waits while a save batch is being written.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Schema version stored under the `format` property.
///
/// A database with a different value has its `thumbs` table dropped and
/// recreated on open.
pub const FORMAT_VERSION: &str = "1";

/// Thumbnail database handle.
pub struct ThumbnailDb {
    conn: Connection,
    db_path: PathBuf,
}

impl ThumbnailDb {
    /// Open or create the thumbnail database at `db_path`.
    /// Creates the parent directory and the schema if needed.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache dir: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn,
            db_path: db_path.to_path_buf(),
        };
        db.create_tables()?;
        db.check_format()?;
        Ok(db)
    }

    /// Get the database file path.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Delete a database file and its WAL/SHM companions.
    ///
    /// This is the "clear cache" operation; a missing file is not an error.
    pub fn delete_file(db_path: &Path) -> Result<()> {
        for suffix in ["", "-wal", "-shm"] {
            let mut name = db_path.as_os_str().to_owned();
            name.push(suffix);
            let path = PathBuf::from(name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed cache file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to delete {}", path.display()))
                }
            }
        }
        Ok(())
    }

    // -- Schema --

    fn create_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS property (
                key TEXT NOT NULL PRIMARY KEY,
                value TEXT
            );

            CREATE TABLE IF NOT EXISTS thumbs (
                key TEXT NOT NULL PRIMARY KEY,
                size INTEGER NOT NULL DEFAULT 0,
                date INTEGER NOT NULL DEFAULT 0,
                value BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_thumbs_date ON thumbs(date);
            ",
        )?;
        Ok(())
    }

    fn check_format(&self) -> Result<()> {
        match self.get_property("format")? {
            Some(format) if format == FORMAT_VERSION => Ok(()),
            Some(format) => {
                info!(
                    found = %format,
                    expected = FORMAT_VERSION,
                    "thumbnail cache format changed, recreating thumbs table"
                );
                self.conn.execute_batch("DROP TABLE IF EXISTS thumbs;")?;
                self.create_tables()?;
                self.set_property("format", FORMAT_VERSION)
            }
            None => self.set_property("format", FORMAT_VERSION),
        }
    }

    // -- Properties --

    /// Store a property key-value pair.
    pub fn set_property(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO property (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a property value.
    pub fn get_property(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM property WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(result)
    }

    // -- Thumbnails --

    /// Insert or replace the encoded thumbnail for `key`.
    pub fn save(&self, key: &str, data: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO thumbs (key, size, date, value) VALUES (?1, ?2, ?3, ?4)",
            params![key, data.len() as i64, chrono::Utc::now().timestamp(), data],
        )?;
        Ok(())
    }

    /// Batch save (wrapped in a transaction for speed).
    pub fn save_batch(&self, items: &[(String, Vec<u8>)]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (key, data) in items {
            self.save(key, data)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load the encoded thumbnail for `key`, `None` on a miss.
    pub fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let result = self
            .conn
            .query_row(
                "SELECT value FROM thumbs WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(result)
    }

    /// Remove one thumbnail.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM thumbs WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    /// Delete thumbnails saved more than `days` days ago.
    pub fn delete_expired(&self, days: u32) -> Result<usize> {
        let limit = chrono::Utc::now().timestamp() - i64::from(days) * 24 * 60 * 60;
        self.delete_saved_before(limit)
    }

    /// Delete thumbnails whose save date (unix seconds) is before `timestamp`.
    pub fn delete_saved_before(&self, timestamp: i64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM thumbs WHERE date < ?1", params![timestamp])?;
        if removed > 0 {
            debug!(removed, "deleted expired thumbnails");
        }
        Ok(removed)
    }

    /// Remove every thumbnail, keeping the schema.
    pub fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM thumbs", [])?;
        Ok(())
    }

    // -- Statistics --

    /// Get thumbnail count.
    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM thumbs", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Get the total encoded size of all thumbnails.
    pub fn total_size(&self) -> Result<i64> {
        let size: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM thumbs",
            [],
            |row| row.get(0),
        )?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (ThumbnailDb, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("thumbs.db");
        let db = ThumbnailDb::open(&db_path).unwrap();
        (db, dir)
    }

    #[test]
    fn test_create_and_empty() {
        let (db, _dir) = test_db();
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.total_size().unwrap(), 0);
        assert_eq!(
            db.get_property("format").unwrap(),
            Some(FORMAT_VERSION.to_string())
        );
    }

    #[test]
    fn test_save_and_load() {
        let (db, _dir) = test_db();
        db.save("abc", &[1, 2, 3, 4]).unwrap();

        assert_eq!(db.load("abc").unwrap(), Some(vec![1, 2, 3, 4]));
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.total_size().unwrap(), 4);
    }

    #[test]
    fn test_load_miss() {
        let (db, _dir) = test_db();
        assert_eq!(db.load("never-saved").unwrap(), None);
    }

    #[test]
    fn test_save_replaces() {
        let (db, _dir) = test_db();
        db.save("abc", &[1, 2, 3]).unwrap();
        db.save("abc", &[9]).unwrap();

        assert_eq!(db.load("abc").unwrap(), Some(vec![9]));
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_batch_save() {
        let (db, _dir) = test_db();
        let items: Vec<_> = (0..50)
            .map(|i| (format!("key-{i}"), vec![i as u8; 8]))
            .collect();
        db.save_batch(&items).unwrap();
        assert_eq!(db.count().unwrap(), 50);
        assert_eq!(db.load("key-7").unwrap(), Some(vec![7; 8]));
    }

    #[test]
    fn test_remove_and_clear() {
        let (db, _dir) = test_db();
        db.save("a", &[1]).unwrap();
        db.save("b", &[2]).unwrap();

        assert!(db.remove("a").unwrap());
        assert!(!db.remove("a").unwrap());
        assert_eq!(db.count().unwrap(), 1);

        db.clear().unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_saved_before() {
        let (db, _dir) = test_db();
        db.save("old", &[1]).unwrap();
        db.conn
            .execute("UPDATE thumbs SET date = 1000 WHERE key = 'old'", [])
            .unwrap();
        db.save("new", &[2]).unwrap();

        assert_eq!(db.delete_saved_before(2000).unwrap(), 1);
        assert_eq!(db.load("old").unwrap(), None);
        assert_eq!(db.load("new").unwrap(), Some(vec![2]));

        // Everything left was saved just now
        assert_eq!(db.delete_expired(1).unwrap(), 0);
    }

    #[test]
    fn test_format_mismatch_recreates_thumbs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("thumbs.db");
        {
            let db = ThumbnailDb::open(&db_path).unwrap();
            db.save("abc", &[1, 2, 3]).unwrap();
            db.set_property("format", "0").unwrap();
        }

        let db = ThumbnailDb::open(&db_path).unwrap();
        assert_eq!(db.load("abc").unwrap(), None);
        assert_eq!(
            db.get_property("format").unwrap(),
            Some(FORMAT_VERSION.to_string())
        );
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("thumbs.db");
        {
            let db = ThumbnailDb::open(&db_path).unwrap();
            db.save("abc", &[5, 6]).unwrap();
        }
        let db = ThumbnailDb::open(&db_path).unwrap();
        assert_eq!(db.load("abc").unwrap(), Some(vec![5, 6]));
        assert_eq!(db.path(), db_path.as_path());
    }

    #[test]
    fn test_delete_file() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("thumbs.db");
        {
            let db = ThumbnailDb::open(&db_path).unwrap();
            db.save("abc", &[1]).unwrap();
        }
        assert!(db_path.exists());

        ThumbnailDb::delete_file(&db_path).unwrap();
        assert!(!db_path.exists());

        // Deleting again is fine
        ThumbnailDb::delete_file(&db_path).unwrap();

        let db = ThumbnailDb::open(&db_path).unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }
}
