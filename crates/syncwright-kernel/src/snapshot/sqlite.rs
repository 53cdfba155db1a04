//! SQLite snapshot store, surviving process restarts.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use syncwright_types::{DocumentId, Uid};

use super::Snapshot;
use super::store::SnapshotStore;
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
-- Last confirmed-synced pair per block
CREATE TABLE IF NOT EXISTS snapshots (
    document TEXT NOT NULL,
    uid TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch()),
    PRIMARY KEY (document, uid)
);
"#;

/// Snapshot store backed by one SQLite database.
pub struct SqliteSnapshotStore {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of stored snapshots across all documents.
    pub fn count(&self) -> StoreResult<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn parse_uid(raw: &str) -> StoreResult<Uid> {
    Uid::parse(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

impl SnapshotStore for SqliteSnapshotStore {
    fn get(&self, document: DocumentId, uid: Uid) -> StoreResult<Option<Snapshot>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT source, target FROM snapshots WHERE document = ?1 AND uid = ?2",
                params![document.to_hex(), uid.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(source, target)| Snapshot { uid, source, target }))
    }

    fn put(&self, document: DocumentId, snapshot: &Snapshot) -> StoreResult<()> {
        self.conn.lock().execute(
            "INSERT INTO snapshots (document, uid, source, target)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(document, uid) DO UPDATE SET
                source = excluded.source,
                target = excluded.target,
                updated_at = unixepoch()",
            params![
                document.to_hex(),
                snapshot.uid.as_str(),
                snapshot.source,
                snapshot.target,
            ],
        )?;
        Ok(())
    }

    fn remove(&self, document: DocumentId, uid: Uid) -> StoreResult<bool> {
        let removed = self.conn.lock().execute(
            "DELETE FROM snapshots WHERE document = ?1 AND uid = ?2",
            params![document.to_hex(), uid.as_str()],
        )?;
        Ok(removed > 0)
    }

    fn uids(&self, document: DocumentId) -> StoreResult<Vec<Uid>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT uid FROM snapshots WHERE document = ?1 ORDER BY uid")?;
        let raw = stmt
            .query_map(params![document.to_hex()], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter().map(|s| parse_uid(s)).collect()
    }
}

impl std::fmt::Debug for SqliteSnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSnapshotStore").finish_non_exhaustive()
    }
}
