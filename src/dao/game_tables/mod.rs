mod sqlite;

use futures::future::BoxFuture;

use crate::dao::{
    models::{ExternalSessionRow, WhitelistRow},
    storage::StorageResult,
};

pub use sqlite::SqliteGameTables;

/// Read-only view over the two tables the game process owns and mutates.
pub trait GameTables: Send + Sync {
    /// Latest session row for `username`, if the game has one.
    fn find_session(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<ExternalSessionRow>>>;
    /// Whitelist row for `username`, if any.
    fn find_whitelist(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<WhitelistRow>>>;
    /// All session rows, oldest first, so later rows for a username supersede earlier ones.
    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<ExternalSessionRow>>>;
    /// All whitelist rows, oldest first.
    fn list_whitelist(&self) -> BoxFuture<'static, StorageResult<Vec<WhitelistRow>>>;
}
