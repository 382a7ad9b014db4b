use std::path::Path;

use futures::future::BoxFuture;
use rusqlite::{OptionalExtension, Row, params, types::ValueRef};
use tracing::warn;

use super::GameTables;
use crate::dao::{
    models::{ExternalSessionRow, WhitelistRow},
    sqlite::{SqliteDaoError, SqliteHandle, SqliteResult},
    storage::StorageResult,
};

const SESSION_TABLE: &str = "networkPlayers";
const WHITELIST_TABLE: &str = "whitelist";

/// Shape of the game tables, only ever created for in-memory stand-ins.
const STAND_IN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS networkPlayers (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL,
  isDead INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS whitelist (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  username TEXT NOT NULL,
  banned TEXT DEFAULT 'false',
  steamid TEXT
);
"#;

/// Game tables read straight from the game's SQLite files.
#[derive(Clone)]
pub struct SqliteGameTables {
    sessions: SqliteHandle,
    whitelist: SqliteHandle,
}

impl SqliteGameTables {
    /// Open both databases read-only. A missing path gets an empty in-memory stand-in.
    pub async fn open(
        sessions_path: Option<&Path>,
        whitelist_path: Option<&Path>,
    ) -> SqliteResult<Self> {
        let sessions = match sessions_path {
            Some(path) => SqliteHandle::open_read_only(path)?,
            None => {
                warn!("no session database configured; using an empty in-memory table");
                stand_in(SESSION_TABLE).await?
            }
        };
        let whitelist = match whitelist_path {
            Some(path) => SqliteHandle::open_read_only(path)?,
            None => {
                warn!("no whitelist database configured; using an empty in-memory table");
                stand_in(WHITELIST_TABLE).await?
            }
        };
        Ok(Self {
            sessions,
            whitelist,
        })
    }
}

async fn stand_in(table: &'static str) -> SqliteResult<SqliteHandle> {
    let handle = SqliteHandle::in_memory()?;
    handle
        .run(move |conn| {
            conn.execute_batch(STAND_IN_SCHEMA)
                .map_err(|source| SqliteDaoError::Schema { table, source })
        })
        .await?;
    Ok(handle)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalSessionRow> {
    Ok(ExternalSessionRow {
        id: row.get(0)?,
        username: row.get(1)?,
        is_dead: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
    })
}

fn whitelist_from_row(row: &Row<'_>) -> rusqlite::Result<WhitelistRow> {
    Ok(WhitelistRow {
        username: row.get(0)?,
        banned: truthy(row.get_ref(1)?),
        external_id: text_id(row.get_ref(2)?),
    })
}

/// The game has stored booleans both as integers and as `'true'`/`'false'` text.
fn truthy(value: ValueRef<'_>) -> bool {
    match value {
        ValueRef::Null | ValueRef::Blob(_) => false,
        ValueRef::Integer(i) => i != 0,
        ValueRef::Real(f) => f != 0.0,
        ValueRef::Text(text) => {
            let text = String::from_utf8_lossy(text);
            let text = text.trim();
            text.eq_ignore_ascii_case("true") || text == "1"
        }
    }
}

fn text_id(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Text(text) => {
            let text = String::from_utf8_lossy(text).trim().to_string();
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

impl GameTables for SqliteGameTables {
    fn find_session(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<ExternalSessionRow>>> {
        let db = self.sessions.clone();
        let username = username.to_owned();
        Box::pin(async move {
            db.run(move |conn| {
                conn.query_row(
                    "SELECT id, username, isDead FROM networkPlayers WHERE username = ?1 ORDER BY id DESC LIMIT 1",
                    params![username],
                    session_from_row,
                )
                .optional()
                .map_err(SqliteDaoError::query(SESSION_TABLE))
            })
            .await
            .map_err(Into::into)
        })
    }

    fn find_whitelist(&self, username: &str) -> BoxFuture<'static, StorageResult<Option<WhitelistRow>>> {
        let db = self.whitelist.clone();
        let username = username.to_owned();
        Box::pin(async move {
            db.run(move |conn| {
                conn.query_row(
                    "SELECT username, banned, steamid FROM whitelist WHERE username = ?1 ORDER BY id DESC LIMIT 1",
                    params![username],
                    whitelist_from_row,
                )
                .optional()
                .map_err(SqliteDaoError::query(WHITELIST_TABLE))
            })
            .await
            .map_err(Into::into)
        })
    }

    fn list_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<ExternalSessionRow>>> {
        let db = self.sessions.clone();
        Box::pin(async move {
            db.run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT id, username, isDead FROM networkPlayers ORDER BY id")
                    .map_err(SqliteDaoError::query(SESSION_TABLE))?;
                let rows = stmt
                    .query_map([], session_from_row)
                    .map_err(SqliteDaoError::query(SESSION_TABLE))?;
                let sessions = rows
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(SqliteDaoError::query(SESSION_TABLE))?;
                Ok(sessions)
            })
            .await
            .map_err(Into::into)
        })
    }

    fn list_whitelist(&self) -> BoxFuture<'static, StorageResult<Vec<WhitelistRow>>> {
        let db = self.whitelist.clone();
        Box::pin(async move {
            db.run(|conn| {
                let mut stmt = conn
                    .prepare("SELECT username, banned, steamid FROM whitelist ORDER BY id")
                    .map_err(SqliteDaoError::query(WHITELIST_TABLE))?;
                let rows = stmt
                    .query_map([], whitelist_from_row)
                    .map_err(SqliteDaoError::query(WHITELIST_TABLE))?;
                let entries = rows
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(SqliteDaoError::query(WHITELIST_TABLE))?;
                Ok(entries)
            })
            .await
            .map_err(Into::into)
        })
    }
}

#[cfg(test)]
impl SqliteGameTables {
    /// Empty stand-in tables that tests can seed.
    pub(crate) async fn stand_in_for_tests() -> Self {
        Self::open(None, None).await.unwrap()
    }

    pub(crate) async fn insert_session(&self, username: &str, is_dead: i64) {
        let username = username.to_owned();
        self.sessions
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO networkPlayers (username, isDead) VALUES (?1, ?2)",
                    params![username, is_dead],
                )
                .map_err(SqliteDaoError::query(SESSION_TABLE))
            })
            .await
            .unwrap();
    }

    pub(crate) async fn insert_whitelist(&self, username: &str, banned: &str, steamid: Option<&str>) {
        let username = username.to_owned();
        let banned = banned.to_owned();
        let steamid = steamid.map(str::to_owned);
        self.whitelist
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO whitelist (username, banned, steamid) VALUES (?1, ?2, ?3)",
                    params![username, banned, steamid],
                )
                .map_err(SqliteDaoError::query(WHITELIST_TABLE))
            })
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_session_row_wins() {
        let tables = SqliteGameTables::stand_in_for_tests().await;
        tables.insert_session("Bob", 1).await;
        tables.insert_session("Bob", 0).await;

        let row = tables.find_session("Bob").await.unwrap().unwrap();
        assert!(!row.is_dead());
        assert_eq!(row.id, 2);
        assert!(tables.find_session("Alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn whitelist_accepts_textual_and_numeric_flags() {
        let tables = SqliteGameTables::stand_in_for_tests().await;
        tables.insert_whitelist("a", "true", Some("7656119")).await;
        tables.insert_whitelist("b", "1", None).await;
        tables.insert_whitelist("c", "false", Some("  ")).await;

        let a = tables.find_whitelist("a").await.unwrap().unwrap();
        assert!(a.banned);
        assert_eq!(a.external_id.as_deref(), Some("7656119"));

        assert!(tables.find_whitelist("b").await.unwrap().unwrap().banned);

        let c = tables.find_whitelist("c").await.unwrap().unwrap();
        assert!(!c.banned);
        assert_eq!(c.external_id, None);
    }

    #[tokio::test]
    async fn missing_database_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("players.db");
        assert!(
            SqliteGameTables::open(Some(&missing), None)
                .await
                .is_err()
        );
    }

    #[test]
    fn truthy_handles_every_storage_class() {
        assert!(truthy(ValueRef::Integer(2)));
        assert!(!truthy(ValueRef::Integer(0)));
        assert!(truthy(ValueRef::Text(b"TRUE")));
        assert!(!truthy(ValueRef::Text(b"no")));
        assert!(!truthy(ValueRef::Null));
    }
}
