use std::path::Path;

use futures::future::BoxFuture;
use rusqlite::{OptionalExtension, Row, params};
use serde_json::{Map, Value};

use super::SnapshotStore;
use crate::dao::{
    models::{PlayerRecord, TimestampMs},
    sqlite::{SqliteDaoError, SqliteHandle, SqliteResult},
    storage::{StorageError, StorageResult},
};

const PLAYER_TABLE: &str = "player";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS player (
  username TEXT PRIMARY KEY,
  data_json TEXT NOT NULL,
  dead_at INTEGER,
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
"#;

const UPSERT_PLAYER: &str = "
INSERT INTO player (username, data_json, dead_at, created_at, updated_at)
VALUES (?1, ?2, NULL, ?3, ?3)
ON CONFLICT(username) DO UPDATE SET
  data_json = excluded.data_json,
  updated_at = excluded.updated_at";

const MARK_DEAD: &str = "
INSERT INTO player (username, data_json, dead_at, created_at, updated_at)
VALUES (?1, ?2, ?3, ?3, ?3)
ON CONFLICT(username) DO UPDATE SET
  data_json = excluded.data_json,
  updated_at = excluded.updated_at,
  dead_at = MAX(COALESCE(player.dead_at, 0), excluded.dead_at)";

/// Row as stored, before the profile JSON is decoded.
struct RawPlayerRow {
    username: String,
    data_json: String,
    dead_at: Option<TimestampMs>,
    updated_at: TimestampMs,
}

impl RawPlayerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            username: row.get(0)?,
            data_json: row.get(1)?,
            dead_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn decode(self) -> StorageResult<PlayerRecord> {
        let profile = serde_json::from_str::<Map<String, Value>>(&self.data_json).map_err(
            |source| StorageError::CorruptProfile {
                username: self.username.clone(),
                source,
            },
        )?;
        Ok(PlayerRecord {
            username: self.username,
            profile,
            dead_at: self.dead_at,
            updated_at: self.updated_at,
        })
    }
}

/// Snapshot Store backed by a SQLite file the bridge owns.
#[derive(Clone)]
pub struct SqliteSnapshotStore {
    db: SqliteHandle,
}

impl SqliteSnapshotStore {
    /// Open the database at `path`, creating the file and the `player` table when missing.
    pub async fn open(path: &Path) -> SqliteResult<Self> {
        Self::with_handle(SqliteHandle::open_owned(path)?).await
    }

    /// Private in-memory database, used by tests and debug runs.
    pub async fn in_memory() -> SqliteResult<Self> {
        Self::with_handle(SqliteHandle::in_memory()?).await
    }

    async fn with_handle(db: SqliteHandle) -> SqliteResult<Self> {
        db.run(|conn| {
            conn.execute_batch(SCHEMA)
                .map_err(|source| SqliteDaoError::Schema {
                    table: PLAYER_TABLE,
                    source,
                })
        })
        .await?;
        Ok(Self { db })
    }

    fn write(
        &self,
        sql: &'static str,
        username: &str,
        profile: &Map<String, Value>,
        at: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let db = self.db.clone();
        let username = username.to_owned();
        let data_json = Value::Object(profile.clone()).to_string();
        Box::pin(async move {
            db.run(move |conn| {
                conn.execute(sql, params![username, data_json, at])
                    .map_err(SqliteDaoError::query(PLAYER_TABLE))?;
                Ok(())
            })
            .await
            .map_err(Into::into)
        })
    }
}

impl SnapshotStore for SqliteSnapshotStore {
    fn find_player(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<PlayerRecord>>> {
        let db = self.db.clone();
        let username = username.to_owned();
        Box::pin(async move {
            let raw = db
                .run(move |conn| {
                    conn.query_row(
                        "SELECT username, data_json, dead_at, updated_at FROM player WHERE username = ?1",
                        params![username],
                        RawPlayerRow::from_row,
                    )
                    .optional()
                    .map_err(SqliteDaoError::query(PLAYER_TABLE))
                })
                .await?;
            raw.map(RawPlayerRow::decode).transpose()
        })
    }

    fn list_players(&self) -> BoxFuture<'static, StorageResult<Vec<PlayerRecord>>> {
        let db = self.db.clone();
        Box::pin(async move {
            let rows = db
                .run(|conn| {
                    let mut stmt = conn
                        .prepare(
                            "SELECT username, data_json, dead_at, updated_at FROM player ORDER BY username",
                        )
                        .map_err(SqliteDaoError::query(PLAYER_TABLE))?;
                    let rows = stmt
                        .query_map([], RawPlayerRow::from_row)
                        .map_err(SqliteDaoError::query(PLAYER_TABLE))?;
                    let players = rows
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .map_err(SqliteDaoError::query(PLAYER_TABLE))?;
                    Ok(players)
                })
                .await?;
            rows.into_iter().map(RawPlayerRow::decode).collect()
        })
    }

    fn upsert_player(
        &self,
        username: &str,
        profile: &Map<String, Value>,
        at: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(UPSERT_PLAYER, username, profile, at)
    }

    fn mark_dead(
        &self,
        username: &str,
        profile: &Map<String, Value>,
        at: TimestampMs,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(MARK_DEAD, username, profile, at)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let db = self.db.clone();
        Box::pin(async move {
            db.run(|conn| {
                conn.query_row("SELECT 1", [], |_| Ok(()))
                    .map_err(SqliteDaoError::query(PLAYER_TABLE))
            })
            .await
            .map_err(Into::into)
        })
    }
}
