use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};

use waypost_core::{KvStore, StoreError};

/// Durable document store: one row per key in a single sqlite table.
pub struct DbStore {
    conn: Mutex<Connection>,
}

impl DbStore {
    pub fn new(path: &str) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::new(":memory:")
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> SqlResult<T>) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection lock poisoned".to_string()))?;
        f(&conn).map_err(|e| StoreError::Backend(e.to_string()))
    }
}

fn init_tables(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS documents (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )
}

impl KvStore for DbStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT value FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO documents (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM documents WHERE key = ?1", params![key])
                .map(|_| ())
        })
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM documents ORDER BY key")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let keys = rows.collect::<SqlResult<Vec<String>>>();
            keys
        })
    }
}
