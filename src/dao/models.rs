use serde_json::{Map, Value};

/// Unix timestamp in milliseconds, the unit every table in this crate stores.
pub type TimestampMs = i64;

/// Death time written when the game reports a player dead but no local timestamp exists.
pub const UNKNOWN_DEATH_TIME: TimestampMs = 1;

/// Row of the Snapshot Store: the last profile reported by the game for a username.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Unique key shared by every player source.
    pub username: String,
    /// Opaque profile blob as last reported by the game, after access-level normalization.
    pub profile: Map<String, Value>,
    /// Locally believed time of death, if any.
    pub dead_at: Option<TimestampMs>,
    /// Time of the last write to the row.
    pub updated_at: TimestampMs,
}

/// Row of the game's own live session table (`networkPlayers`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalSessionRow {
    /// Row id assigned by the game; a higher id is a newer session.
    pub id: i64,
    /// Account name as the game stores it.
    pub username: String,
    /// Raw death flag: `0` means alive, any other value means dead.
    pub is_dead: i64,
}

impl ExternalSessionRow {
    /// Whether the game flags the character as dead.
    pub fn is_dead(&self) -> bool {
        self.is_dead != 0
    }
}

/// Row of the game's whitelist table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhitelistRow {
    /// Account name as the game stores it.
    pub username: String,
    /// Whether the account is banned.
    pub banned: bool,
    /// Platform account identifier (Steam id) when the game recorded one.
    pub external_id: Option<String>,
}
