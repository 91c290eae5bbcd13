//! SQLite-based store implementation

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::{HistoryEntry, HistoryEvent, PersistenceStore, StoreError, StoreResult};

/// SQLite-based store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            -- Framed aggregates, one row per key
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL
            );

            -- Lock history (append-only)
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                utc INTEGER NOT NULL,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_utc ON history(utc);
            "#,
        )?;

        debug!("Store schema initialized");
        Ok(())
    }
}

fn upsert_blob(conn: &Connection, key: &str, bytes: &[u8]) -> StoreResult<()> {
    conn.execute(
        r#"
        INSERT INTO blobs (key, data)
        VALUES (?, ?)
        ON CONFLICT(key)
        DO UPDATE SET data = excluded.data
        "#,
        params![key, bytes],
    )?;
    Ok(())
}

impl PersistenceStore for SqliteStore {
    fn read(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;

        let data: Option<Vec<u8>> = conn
            .query_row("SELECT data FROM blobs WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?;

        Ok(data)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        let conn = self.conn()?;
        upsert_blob(&conn, key, bytes)?;
        debug!(key, len = bytes.len(), "Blob written");
        Ok(())
    }

    fn write_batch(&self, entries: &[(&str, &[u8])]) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, bytes) in entries {
            upsert_blob(&tx, key, bytes)?;
        }
        tx.commit()?;
        debug!(count = entries.len(), "Blob batch written");
        Ok(())
    }

    fn append_history(&self, mut entry: HistoryEntry) -> StoreResult<()> {
        let conn = self.conn()?;
        let event_json = serde_json::to_string(&entry.event)?;

        conn.execute(
            "INSERT INTO history (utc, event_json) VALUES (?, ?)",
            params![entry.utc, event_json],
        )?;

        entry.id = conn.last_insert_rowid();
        debug!(entry_id = entry.id, "History entry appended");

        Ok(())
    }

    fn recent_history(&self, limit: usize) -> StoreResult<Vec<HistoryEntry>> {
        let conn = self.conn()?;

        let mut stmt =
            conn.prepare("SELECT id, utc, event_json FROM history ORDER BY id DESC LIMIT ?")?;

        let rows = stmt.query_map([limit as i64], |row| {
            let id: i64 = row.get(0)?;
            let utc: u32 = row.get(1)?;
            let event_json: String = row.get(2)?;
            Ok((id, utc, event_json))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, utc, event_json) = row?;
            let event: HistoryEvent = serde_json::from_str(&event_json)?;
            entries.push(HistoryEntry { id, utc, event });
        }

        Ok(entries)
    }

    fn is_healthy(&self) -> bool {
        match self.conn.lock() {
            Ok(conn) => conn.query_row("SELECT 1", [], |_| Ok(())).is_ok(),
            Err(_) => {
                warn!("Store lock poisoned");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_session, load_session};
    use ckos_api::{LockSession, LockType, OperationalState};

    #[test]
    fn test_in_memory_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.is_healthy());
    }

    #[test]
    fn blobs_replace_by_key() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.read("session").unwrap().is_none());

        store.write("session", &[1, 2, 3]).unwrap();
        store.write("session", &[4, 5]).unwrap();
        assert_eq!(store.read("session").unwrap(), Some(vec![4, 5]));
    }

    #[test]
    fn batch_writes_every_key() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .write_batch(&[("a", &[1][..]), ("b", &[2][..])])
            .unwrap();
        assert_eq!(store.read("a").unwrap(), Some(vec![1]));
        assert_eq!(store.read("b").unwrap(), Some(vec![2]));
    }

    #[test]
    fn history_newest_first() {
        let store = SqliteStore::in_memory().unwrap();

        store
            .append_history(HistoryEntry::new(10, HistoryEvent::ServiceStarted))
            .unwrap();
        store
            .append_history(HistoryEntry::new(
                20,
                HistoryEvent::SessionStarted {
                    lock_type: LockType::Custom,
                    unlock_target_utc: Some(3620),
                },
            ))
            .unwrap();

        let entries = store.recent_history(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].utc, 20);
        assert!(matches!(entries[1].event, HistoryEvent::ServiceStarted));

        assert_eq!(store.recent_history(1).unwrap().len(), 1);
    }

    #[test]
    fn session_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckos.db");
        let session = LockSession {
            operational_state: OperationalState::Locked,
            lock_start_utc: 1000,
            ..Default::default()
        };

        {
            let store = SqliteStore::open(&path).unwrap();
            store.write("session", &encode_session(&session)).unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(load_session(&store, "session").unwrap(), Some(session));
    }
}
