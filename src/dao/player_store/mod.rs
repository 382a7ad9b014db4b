mod sqlite;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::dao::{
    models::{PlayerRecord, TimestampMs},
    storage::StorageResult,
};

pub use sqlite::SqliteSnapshotStore;

/// Durable per-player profile cache keyed by username.
///
/// Every write is a single-row insert-or-merge; concurrent writers for the same username are
/// resolved by the backend (last write wins on the profile and `updated_at`).
pub trait SnapshotStore: Send + Sync {
    /// Stored snapshot for `username`, if any.
    fn find_player(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<PlayerRecord>>>;
    /// Every stored snapshot.
    fn list_players(&self) -> BoxFuture<'static, StorageResult<Vec<PlayerRecord>>>;
    /// Insert or replace the profile of `username`, leaving any recorded death untouched.
    fn upsert_player(
        &self,
        username: &str,
        profile: &Map<String, Value>,
        at: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Insert or replace the profile and stamp the death time. A later stamp never moves back.
    fn mark_dead(
        &self,
        username: &str,
        profile: &Map<String, Value>,
        at: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Run a trivial query to confirm the store answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}
