use crate::SimpleKeyValueStore;
use kvfs_lib::{FsError, FsResult};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

/// Simple store persisted in a single-table SQLite database. One row per
/// key; values are raw blobs.
pub struct SqliteStore {
    pub db_path: String,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<String>) -> FsResult<Self> {
        let db_path = db_path.into();
        debug!("SqliteStore: open db path: {}", db_path);
        let conn = Connection::open(&db_path).map_err(|e| {
            warn!("SqliteStore: open db failed! {}", e.to_string());
            FsError::DbError(e.to_string())
        })?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS blobs (
                k TEXT PRIMARY KEY,
                v BLOB NOT NULL
            )",
            [],
        )
        .map_err(|e| {
            warn!("SqliteStore: create table blobs failed! {}", e.to_string());
            FsError::DbError(e.to_string())
        })?;

        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> FsResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| FsError::DbError(format!("conn lock poisoned: {}", e)))
    }
}

impl SimpleKeyValueStore for SqliteStore {
    fn name(&self) -> String {
        "sqlite".to_string()
    }

    fn clear(&self) -> FsResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM blobs", []).map_err(|e| {
            warn!("SqliteStore: clear failed! {}", e.to_string());
            FsError::DbError(e.to_string())
        })?;
        Ok(())
    }

    fn get(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT v FROM blobs WHERE k = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| {
            warn!("SqliteStore: query blob failed! {}", e.to_string());
            FsError::DbError(e.to_string())
        })
    }

    fn put(&self, key: &str, value: &[u8], overwrite: bool) -> FsResult<bool> {
        let conn = self.lock_conn()?;
        let changed = if overwrite {
            conn.execute(
                "INSERT OR REPLACE INTO blobs (k, v) VALUES (?1, ?2)",
                params![key, value],
            )
        } else {
            conn.execute(
                "INSERT OR IGNORE INTO blobs (k, v) VALUES (?1, ?2)",
                params![key, value],
            )
        }
        .map_err(|e| {
            warn!("SqliteStore: insert blob failed! {}", e.to_string());
            FsError::DbError(e.to_string())
        })?;
        Ok(changed > 0)
    }

    fn del(&self, key: &str) -> FsResult<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM blobs WHERE k = ?1", params![key])
            .map_err(|e| {
                warn!("SqliteStore: remove blob failed! {}", e.to_string());
                FsError::DbError(e.to_string())
            })?;
        Ok(())
    }
}
