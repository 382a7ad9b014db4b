//! Error types shared by the SQLite-backed stores.

use std::path::PathBuf;

use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`SqliteDaoError`] failures.
pub type SqliteResult<T> = Result<T, SqliteDaoError>;

/// Failures that can occur while interacting with a SQLite database.
#[derive(Debug, Error)]
pub enum SqliteDaoError {
    /// The database file could not be opened.
    #[error("failed to open SQLite database `{}`", path.display())]
    Open {
        /// Database file.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: rusqlite::Error,
    },
    /// Creating the owned schema failed.
    #[error("failed to prepare schema for table `{table}`")]
    Schema {
        /// Table involved.
        table: &'static str,
        /// Underlying error.
        #[source]
        source: rusqlite::Error,
    },
    /// A statement against `table` failed.
    #[error("SQLite query on `{table}` failed")]
    Query {
        /// Table involved.
        table: &'static str,
        /// Underlying error.
        #[source]
        source: rusqlite::Error,
    },
    /// The blocking task running the statement panicked or was cancelled.
    #[error("SQLite worker task failed")]
    Join {
        /// Underlying error.
        #[source]
        source: tokio::task::JoinError,
    },
    /// A previous statement panicked while holding the connection.
    #[error("SQLite connection is poisoned")]
    Poisoned,
}

impl SqliteDaoError {
    pub(crate) fn query(table: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| SqliteDaoError::Query { table, source }
    }
}

impl From<SqliteDaoError> for StorageError {
    fn from(err: SqliteDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
