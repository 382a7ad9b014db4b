//! Player reconciliation: merges the Snapshot Store with the game's session and whitelist tables.
//!
//! The session table is authoritative for whether a player is currently alive, the snapshot is
//! authoritative for profile content, and the whitelist decides bans. Nothing computed here is
//! cached; every query re-reads the three sources.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::future::try_join_all;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    dao::{
        game_tables::GameTables,
        models::{ExternalSessionRow, PlayerRecord, TimestampMs, UNKNOWN_DEATH_TIME, WhitelistRow},
        player_store::SnapshotStore,
    },
    dto::player::{PlayerProjection, PlayerStatus, RESERVED_KEYS},
    error::ServiceError,
};

const ACCESS_LEVEL_KEY: &str = "access_level";

/// Entry point for every read and write of player state.
#[derive(Clone)]
pub struct PlayerReconciler {
    snapshots: Arc<dyn SnapshotStore>,
    tables: Arc<dyn GameTables>,
}

impl PlayerReconciler {
    /// Reconciler over the given stores.
    pub fn new(snapshots: Arc<dyn SnapshotStore>, tables: Arc<dyn GameTables>) -> Self {
        Self { snapshots, tables }
    }

    /// Reconciled projection of `username`, or `None` when the Snapshot Store has no row.
    pub async fn get_player(&self, username: &str) -> Result<Option<PlayerProjection>, ServiceError> {
        let Some(record) = self.snapshots.find_player(username).await? else {
            return Ok(None);
        };

        let (session, whitelist) = tokio::try_join!(
            self.tables.find_session(username),
            self.tables.find_whitelist(username)
        )?;

        Ok(Some(reconcile(record, session.as_ref(), whitelist.as_ref())))
    }

    /// Reconciled projection of every Snapshot Store row, ordered by username.
    pub async fn list_players(&self) -> Result<Vec<PlayerProjection>, ServiceError> {
        Ok(self
            .list_players_with_sessions()
            .await?
            .into_iter()
            .map(|(projection, _)| projection)
            .collect())
    }

    /// Like [`PlayerReconciler::list_players`], paired with the session row each projection was
    /// reconciled against.
    pub async fn list_players_with_sessions(
        &self,
    ) -> Result<Vec<(PlayerProjection, Option<ExternalSessionRow>)>, ServiceError> {
        let (records, sessions, whitelist) = tokio::try_join!(
            self.snapshots.list_players(),
            self.tables.list_sessions(),
            self.tables.list_whitelist()
        )?;

        // Rows come oldest first, so collecting keeps the latest row per username.
        let sessions: HashMap<String, ExternalSessionRow> = sessions
            .into_iter()
            .map(|row| (row.username.clone(), row))
            .collect();
        let whitelist: HashMap<String, WhitelistRow> = whitelist
            .into_iter()
            .map(|row| (row.username.clone(), row))
            .collect();

        Ok(records
            .into_iter()
            .map(|record| {
                let session = sessions.get(&record.username).cloned();
                let entry = whitelist.get(&record.username);
                (reconcile(record, session.as_ref(), entry), session)
            })
            .collect())
    }

    /// Status of `username`. Unknown players are `NONE`, never an error.
    pub async fn get_status(&self, username: &str) -> Result<PlayerStatus, ServiceError> {
        let (whitelist, session, record) = tokio::try_join!(
            self.tables.find_whitelist(username),
            self.tables.find_session(username),
            self.snapshots.find_player(username)
        )?;

        Ok(derive_status(
            whitelist.as_ref(),
            session.as_ref(),
            record.is_some(),
        ))
    }

    /// Normalize and store one profile reported by the game.
    pub async fn upsert_player(&self, profile: Value) -> Result<(), ServiceError> {
        let (username, profile) = normalize_profile(profile)?;
        debug!(username = %username, "upserting player snapshot");
        self.snapshots
            .upsert_player(&username, &profile, now_ms())
            .await?;
        Ok(())
    }

    /// Store a batch of profiles. Writes for distinct usernames run concurrently.
    pub async fn upsert_players(&self, profiles: Vec<Value>) -> Result<(), ServiceError> {
        let at = now_ms();
        let normalized = profiles
            .into_iter()
            .map(normalize_profile)
            .collect::<Result<Vec<_>, _>>()?;

        try_join_all(
            normalized
                .iter()
                .map(|(username, profile)| self.snapshots.upsert_player(username, profile, at)),
        )
        .await?;
        Ok(())
    }

    /// Store the profile and stamp the player dead now.
    pub async fn mark_dead(&self, profile: Value) -> Result<(), ServiceError> {
        let (username, profile) = normalize_profile(profile)?;
        debug!(username = %username, "marking player dead");
        self.snapshots
            .mark_dead(&username, &profile, now_ms())
            .await?;
        Ok(())
    }

    /// Check that the Snapshot Store answers.
    pub async fn health_check(&self) -> Result<(), ServiceError> {
        self.snapshots.health_check().await?;
        Ok(())
    }
}

/// Merge one snapshot row with the matching session and whitelist rows.
pub fn reconcile(
    record: PlayerRecord,
    session: Option<&ExternalSessionRow>,
    whitelist: Option<&WhitelistRow>,
) -> PlayerProjection {
    let dead_at = match session {
        Some(row) if row.is_dead() => Some(record.dead_at.unwrap_or(UNKNOWN_DEATH_TIME)),
        Some(_) => None,
        None => record.dead_at,
    };

    let mut profile = record.profile;
    for key in RESERVED_KEYS {
        profile.remove(key);
    }

    PlayerProjection {
        profile,
        updated_at: record.updated_at,
        dead_at,
        banned: whitelist.is_some_and(|row| row.banned),
        external_id: whitelist.and_then(|row| row.external_id.clone()),
    }
}

/// Decide a status from the three sources: ban first, then session death, then snapshot presence.
///
/// A missing whitelist row counts as "not banned", the same default projections use.
pub fn derive_status(
    whitelist: Option<&WhitelistRow>,
    session: Option<&ExternalSessionRow>,
    has_snapshot: bool,
) -> PlayerStatus {
    if whitelist.is_some_and(|row| row.banned) {
        return PlayerStatus::Banned;
    }
    let Some(session) = session else {
        return PlayerStatus::None;
    };
    if session.is_dead() {
        PlayerStatus::Dead
    } else if has_snapshot {
        PlayerStatus::Alive
    } else {
        PlayerStatus::None
    }
}

/// Check the shape of a game profile and canonicalize its access level.
fn normalize_profile(profile: Value) -> Result<(String, Map<String, Value>), ServiceError> {
    let Value::Object(mut profile) = profile else {
        return Err(ServiceError::InvalidInput(
            "player profile must be a JSON object".into(),
        ));
    };

    let username = match profile.get("username") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        _ => {
            return Err(ServiceError::InvalidInput(
                "player profile has no username".into(),
            ));
        }
    };

    if let Some(Value::String(level)) = profile.get_mut(ACCESS_LEVEL_KEY) {
        let lowered = level.to_lowercase();
        *level = if lowered == "none" {
            "player".to_string()
        } else {
            lowered
        };
    }

    Ok((username, profile))
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| TimestampMs::try_from(elapsed.as_millis()).unwrap_or(TimestampMs::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dao::{game_tables::SqliteGameTables, player_store::SqliteSnapshotStore};

    struct Fixture {
        reconciler: PlayerReconciler,
        tables: SqliteGameTables,
    }

    async fn fixture() -> Fixture {
        let snapshots = SqliteSnapshotStore::in_memory().await.unwrap();
        let tables = SqliteGameTables::stand_in_for_tests().await;
        Fixture {
            reconciler: PlayerReconciler::new(Arc::new(snapshots), Arc::new(tables.clone())),
            tables,
        }
    }

    fn session(is_dead: i64) -> ExternalSessionRow {
        ExternalSessionRow {
            id: 1,
            username: "Bob".into(),
            is_dead,
        }
    }

    fn whitelisted(banned: bool) -> WhitelistRow {
        WhitelistRow {
            username: "Bob".into(),
            banned,
            external_id: Some("76561198000000000".into()),
        }
    }

    #[test]
    fn ban_wins_over_every_other_source() {
        let banned = whitelisted(true);
        for row in [None, Some(session(0)), Some(session(1))] {
            for has_snapshot in [false, true] {
                assert_eq!(
                    derive_status(Some(&banned), row.as_ref(), has_snapshot),
                    PlayerStatus::Banned
                );
            }
        }
    }

    #[test]
    fn status_follows_decision_order() {
        let allowed = whitelisted(false);
        assert_eq!(derive_status(None, None, true), PlayerStatus::None);
        assert_eq!(derive_status(None, Some(&session(1)), true), PlayerStatus::Dead);
        assert_eq!(derive_status(Some(&allowed), None, true), PlayerStatus::None);
        assert_eq!(
            derive_status(Some(&allowed), Some(&session(1)), false),
            PlayerStatus::Dead
        );
        assert_eq!(
            derive_status(Some(&allowed), Some(&session(0)), true),
            PlayerStatus::Alive
        );
        assert_eq!(
            derive_status(Some(&allowed), Some(&session(0)), false),
            PlayerStatus::None
        );
    }

    #[test]
    fn alive_session_clears_stale_death() {
        let record = PlayerRecord {
            username: "Bob".into(),
            profile: Map::new(),
            dead_at: Some(5_000),
            updated_at: 6_000,
        };
        let projection = reconcile(record.clone(), Some(&session(0)), None);
        assert_eq!(projection.dead_at, None);

        let projection = reconcile(record, None, None);
        assert_eq!(projection.dead_at, Some(5_000));
    }

    #[test]
    fn dead_session_keeps_known_death_time() {
        let record = PlayerRecord {
            username: "Bob".into(),
            profile: Map::new(),
            dead_at: Some(5_000),
            updated_at: 6_000,
        };
        let projection = reconcile(record, Some(&session(1)), Some(&whitelisted(false)));
        assert_eq!(projection.dead_at, Some(5_000));
        assert_eq!(projection.external_id.as_deref(), Some("76561198000000000"));
    }

    #[test]
    fn reserved_profile_keys_are_dropped() {
        let Value::Object(profile) =
            json!({"username": "Bob", "banned": true, "deadAt": "never", "online": true})
        else {
            unreachable!()
        };
        let record = PlayerRecord {
            username: "Bob".into(),
            profile,
            dead_at: None,
            updated_at: 1,
        };
        let projection = reconcile(record, None, None);
        assert!(!projection.banned);
        assert!(!projection.profile.contains_key("banned"));
        assert!(!projection.profile.contains_key("deadAt"));
        assert_eq!(projection.profile["online"], json!(true));
    }

    #[test]
    fn profiles_without_username_are_rejected() {
        assert!(matches!(
            normalize_profile(json!({"forename": "Bob"})),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(matches!(
            normalize_profile(json!(["Bob"])),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn upsert_round_trips_profile_and_normalizes_access_level() {
        let Fixture { reconciler, .. } = fixture().await;
        let profile = json!({
            "username": "Bob",
            "forename": "Bob",
            "surname": "Smith",
            "access_level": "None",
            "traits": ["Brave", "Lucky"],
            "hoursSurvived": 12.5,
        });
        reconciler.upsert_player(profile.clone()).await.unwrap();

        let projection = reconciler.get_player("Bob").await.unwrap().unwrap();
        let Value::Object(mut expected) = profile else {
            unreachable!()
        };
        expected.insert("access_level".into(), json!("player"));
        assert_eq!(projection.profile, expected);

        reconciler
            .upsert_player(json!({"username": "Bob", "access_level": "Admin"}))
            .await
            .unwrap();
        let projection = reconciler.get_player("Bob").await.unwrap().unwrap();
        assert_eq!(projection.profile["access_level"], json!("admin"));
    }

    #[tokio::test]
    async fn unknown_player_is_not_found() {
        let Fixture { reconciler, .. } = fixture().await;
        assert!(reconciler.get_player("ghost").await.unwrap().is_none());
        assert_eq!(
            reconciler.get_status("ghost").await.unwrap(),
            PlayerStatus::None
        );
    }

    #[tokio::test]
    async fn repeated_mark_dead_never_moves_back() {
        let Fixture { reconciler, .. } = fixture().await;
        reconciler.mark_dead(json!({"username": "Bob"})).await.unwrap();
        let first = reconciler.get_player("Bob").await.unwrap().unwrap().dead_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        reconciler.mark_dead(json!({"username": "Bob"})).await.unwrap();
        let second = reconciler.get_player("Bob").await.unwrap().unwrap().dead_at;

        assert!(first.is_some());
        assert!(second >= first);
    }

    #[tokio::test]
    async fn externally_dead_player_gets_sentinel_death() {
        let Fixture { reconciler, tables } = fixture().await;
        reconciler.upsert_player(json!({"username": "Bob"})).await.unwrap();
        tables.insert_session("Bob", 1).await;

        let projection = reconciler.get_player("Bob").await.unwrap().unwrap();
        assert_eq!(projection.dead_at, Some(UNKNOWN_DEATH_TIME));
        assert!(!projection.banned);
        assert_eq!(projection.external_id, None);
        assert_eq!(
            reconciler.get_status("Bob").await.unwrap(),
            PlayerStatus::Dead
        );

        tables.insert_whitelist("Bob", "true", None).await;
        assert_eq!(
            reconciler.get_status("Bob").await.unwrap(),
            PlayerStatus::Banned
        );
    }

    #[tokio::test]
    async fn snapshot_alone_is_not_alive() {
        let Fixture { reconciler, .. } = fixture().await;
        reconciler.upsert_player(json!({"username": "Bob"})).await.unwrap();
        assert_eq!(
            reconciler.get_status("Bob").await.unwrap(),
            PlayerStatus::None
        );
    }

    #[tokio::test]
    async fn list_players_reconciles_every_row() {
        let Fixture { reconciler, tables } = fixture().await;
        reconciler
            .upsert_players(vec![json!({"username": "Bob"}), json!({"username": "Alice"})])
            .await
            .unwrap();
        tables.insert_whitelist("Alice", "1", Some("42")).await;

        let players = reconciler.list_players().await.unwrap();
        let names: Vec<_> = players.iter().filter_map(|p| p.username()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
        assert!(players[0].banned);
        assert_eq!(players[0].external_id.as_deref(), Some("42"));
    }

    #[tokio::test]
    async fn listing_with_sessions_keeps_the_latest_row() {
        let Fixture { reconciler, tables } = fixture().await;
        reconciler
            .upsert_players(vec![json!({"username": "Bob"}), json!({"username": "Alice"})])
            .await
            .unwrap();
        tables.insert_session("Bob", 1).await;
        tables.insert_session("Bob", 0).await;

        let players = reconciler.list_players_with_sessions().await.unwrap();
        let (alice, alice_session) = &players[0];
        assert_eq!(alice.username(), Some("Alice"));
        assert!(alice_session.is_none());

        let (bob, bob_session) = &players[1];
        let bob_session = bob_session.as_ref().unwrap();
        assert_eq!(bob_session.id, 2);
        assert!(!bob_session.is_dead());
        assert_eq!(bob.dead_at, None);
    }
}
