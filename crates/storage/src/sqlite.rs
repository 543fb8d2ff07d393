use rusqlite::{Connection, OptionalExtension};

use crate::error::StorageError;
use crate::traits::DurableStore;

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

impl DurableStore for SqliteStore {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM blobs WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn save(&mut self, key: &str, json: &str) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO blobs (key, value, saved_at) VALUES (?1, ?2, unixepoch())
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, saved_at = excluded.saved_at",
            rusqlite::params![key, json],
        )?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM blobs WHERE key = ?1", rusqlite::params![key])?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_overwrites_and_load_reads_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load("queue").unwrap().is_none());
        store.save("queue", "[1]").unwrap();
        store.save("queue", "[1,2]").unwrap();
        assert_eq!(store.load("queue").unwrap().as_deref(), Some("[1,2]"));
        store.remove("queue").unwrap();
        assert!(store.load("queue").unwrap().is_none());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.db");
        let path = path.to_str().unwrap();
        {
            let mut store = SqliteStore::open(path).unwrap();
            store.save("queue", r#"[{"field":"title"}]"#).unwrap();
        }
        let store = SqliteStore::open(path).unwrap();
        assert_eq!(
            store.load("queue").unwrap().as_deref(),
            Some(r#"[{"field":"title"}]"#)
        );
    }

    #[test]
    fn records_schema_version() {
        let store = SqliteStore::open_in_memory().unwrap();
        let version: i32 = store
            .conn()
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, crate::schema::SCHEMA_VERSION);
    }
}
