//! Player projections handed to external callers.

use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::dao::models::{ExternalSessionRow, TimestampMs};

/// Keys the projection owns; profile entries with these names are dropped before merging.
pub const RESERVED_KEYS: [&str; 4] = ["updatedAt", "deadAt", "banned", "externalId"];

/// Keys an [`InfoPlayer`] adds on top of the projection.
pub const INFO_KEYS: [&str; 3] = ["online", "isDead", "id"];

/// Reconciled view of one player, built per request and never cached.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlayerProjection {
    /// Profile fields as last reported by the game.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub profile: Map<String, Value>,
    /// Time of the last write to the snapshot.
    #[serde(serialize_with = "crate::dto::rfc3339::serialize")]
    #[schema(value_type = String)]
    pub updated_at: TimestampMs,
    /// Death time; the Unix epoch plus one millisecond means "dead, time unknown".
    #[serde(serialize_with = "crate::dto::rfc3339::option::serialize")]
    #[schema(value_type = Option<String>)]
    pub dead_at: Option<TimestampMs>,
    /// Whitelist ban flag.
    pub banned: bool,
    /// Platform account identifier from the whitelist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl PlayerProjection {
    /// Username from the profile, when present.
    pub fn username(&self) -> Option<&str> {
        self.profile.get("username").and_then(Value::as_str)
    }
}

/// Projection entry inside the `/info` payload.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoPlayer {
    /// Reconciled projection.
    #[serde(flatten)]
    pub player: PlayerProjection,
    /// Whether the latest `info` event listed this player.
    pub online: bool,
    /// Death flag of the game's latest session row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_dead: Option<bool>,
    /// Id of the game's latest session row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl InfoPlayer {
    /// Wrap `player`, dropping profile entries that would collide with the keys added here.
    pub fn new(
        mut player: PlayerProjection,
        online: bool,
        session: Option<&ExternalSessionRow>,
    ) -> Self {
        for key in INFO_KEYS {
            player.profile.remove(key);
        }
        Self {
            player,
            online,
            is_dead: session.map(ExternalSessionRow::is_dead),
            id: session.map(|row| row.id),
        }
    }
}

/// Status derived from the whitelist, the game's session table and the Snapshot Store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    /// Never seen by the bridge or the game.
    None,
    /// Known and alive.
    Alive,
    /// Known and dead.
    Dead,
    /// Banned on the whitelist.
    Banned,
}

/// Response of the `/players/{username}/status` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerStatusResponse {
    /// Requested username.
    pub username: String,
    /// Derived status.
    pub status: PlayerStatus,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn projection_flattens_profile_and_renders_times() {
        let Value::Object(profile) = json!({"username": "Bob", "forename": "Bob"}) else {
            unreachable!()
        };
        let projection = PlayerProjection {
            profile,
            updated_at: 0,
            dead_at: None,
            banned: false,
            external_id: None,
        };

        assert_eq!(
            serde_json::to_value(&projection).unwrap(),
            json!({
                "username": "Bob",
                "forename": "Bob",
                "updatedAt": "1970-01-01T00:00:00Z",
                "deadAt": null,
                "banned": false,
            })
        );
    }

    #[test]
    fn info_player_owns_online_and_session_keys() {
        let Value::Object(profile) =
            json!({"username": "Bob", "online": "yes", "isDead": 7, "id": "x"})
        else {
            unreachable!()
        };
        let projection = PlayerProjection {
            profile,
            updated_at: 0,
            dead_at: None,
            banned: false,
            external_id: None,
        };
        let session = ExternalSessionRow {
            id: 9,
            username: "Bob".into(),
            is_dead: 1,
        };

        let value = serde_json::to_value(InfoPlayer::new(projection.clone(), true, Some(&session)))
            .unwrap();
        assert_eq!(value["online"], json!(true));
        assert_eq!(value["isDead"], json!(true));
        assert_eq!(value["id"], json!(9));

        let value = serde_json::to_value(InfoPlayer::new(projection, false, None)).unwrap();
        assert_eq!(value["online"], json!(false));
        assert!(value.get("isDead").is_none());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn status_uses_upper_case_names() {
        assert_eq!(
            serde_json::to_value(PlayerStatus::Banned).unwrap(),
            json!("BANNED")
        );
    }
}
