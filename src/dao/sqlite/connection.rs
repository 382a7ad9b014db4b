use std::{
    path::Path,
    sync::{Arc, Mutex},
};

use rusqlite::{Connection, OpenFlags};

use super::error::{SqliteDaoError, SqliteResult};

/// Cloneable handle running statements against one SQLite connection off the async runtime.
#[derive(Clone)]
pub struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHandle {
    /// Open (creating if needed) a database the bridge owns.
    pub fn open_owned(path: &Path) -> SqliteResult<Self> {
        let conn = Connection::open(path).map_err(|source| SqliteDaoError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| SqliteDaoError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_connection(conn))
    }

    /// Open a database owned by the game. The file must exist and is never written.
    pub fn open_read_only(path: &Path) -> SqliteResult<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn =
            Connection::open_with_flags(path, flags).map_err(|source| SqliteDaoError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database, used for debug runs and tests.
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory().map_err(|source| SqliteDaoError::Open {
            path: ":memory:".into(),
            source,
        })?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `op` with exclusive access to the connection on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> SqliteResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> SqliteResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| SqliteDaoError::Poisoned)?;
            op(&guard)
        })
        .await
        .map_err(|source| SqliteDaoError::Join { source })?
    }
}
