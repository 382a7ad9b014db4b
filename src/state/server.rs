//! Live view of the game server assembled from `info` and `pong` events.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::{dao::models::TimestampMs, dto::info::ServerStatus};

/// Merged server data and the time players were last refreshed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerData {
    /// Merged payload of `info` and `pong` events.
    pub data: Option<Value>,
    /// Time players were last refreshed.
    pub last_updated: Option<TimestampMs>,
}

impl ServerData {
    /// Usernames listed by the latest `info` event.
    pub fn online_usernames(&self) -> Vec<String> {
        self.data
            .as_ref()
            .and_then(|data| data.get("players"))
            .and_then(Value::as_array)
            .map(|players| {
                players
                    .iter()
                    .filter_map(|player| player.get("username").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct SessionInner {
    status: watch::Sender<ServerStatus>,
    data: watch::Sender<ServerData>,
}

/// Liveness flag plus merged server data, shared by the supervisor (writer) and readers.
#[derive(Clone)]
pub struct ServerSession {
    inner: Arc<SessionInner>,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerSession {
    /// A session starts down with no data.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ServerStatus::Down);
        let (data, _) = watch::channel(ServerData::default());
        Self {
            inner: Arc::new(SessionInner { status, data }),
        }
    }

    /// Current liveness.
    pub fn status(&self) -> ServerStatus {
        *self.inner.status.borrow()
    }

    /// Watch liveness changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ServerStatus> {
        self.inner.status.subscribe()
    }

    /// Record liveness, logging transitions only.
    pub fn set_status(&self, status: ServerStatus) {
        let changed = self.inner.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
        if changed {
            info!(?status, "game server liveness changed");
        }
    }

    /// Copy of the merged data.
    pub fn snapshot(&self) -> ServerData {
        self.inner.data.borrow().clone()
    }

    /// Fold an `info` payload: players and safehouses are replaced, `game` is merged key by key.
    pub fn merge_info(&self, incoming: &Value) {
        self.merge(incoming, &["players", "safeHouses"], &["game"]);
    }

    /// Fold a `pong` payload: `server` and `game` are merged key by key.
    pub fn merge_pong(&self, incoming: &Value) {
        self.merge(incoming, &[], &["server", "game"]);
    }

    /// Record that players were refreshed at `at`.
    pub fn touch(&self, at: TimestampMs) {
        self.inner.data.send_modify(|state| state.last_updated = Some(at));
    }

    fn merge(&self, incoming: &Value, replaced: &[&str], merged: &[&str]) {
        let Value::Object(incoming) = incoming else {
            warn!("ignoring server data that is not a JSON object");
            return;
        };

        self.inner.data.send_modify(|state| {
            let Some(Value::Object(current)) = state.data.as_mut() else {
                state.data = Some(Value::Object(incoming.clone()));
                return;
            };
            for key in replaced {
                match incoming.get(*key) {
                    Some(value) => {
                        current.insert((*key).to_string(), value.clone());
                    }
                    None => {
                        current.remove(*key);
                    }
                }
            }
            for key in merged {
                shallow_merge(current, key, incoming.get(*key));
            }
        });
    }
}

fn shallow_merge(target: &mut Map<String, Value>, key: &str, incoming: Option<&Value>) {
    let Some(Value::Object(incoming)) = incoming else {
        return;
    };
    match target.get_mut(key) {
        Some(Value::Object(existing)) => {
            existing.extend(incoming.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        _ => {
            target.insert(key.to_string(), Value::Object(incoming.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_payload_is_taken_whole() {
        let session = ServerSession::new();
        session.merge_pong(&json!({"server": {"name": "pz"}, "game": {"day": 1}}));
        assert_eq!(
            session.snapshot().data,
            Some(json!({"server": {"name": "pz"}, "game": {"day": 1}}))
        );
    }

    #[test]
    fn info_replaces_lists_and_merges_game() {
        let session = ServerSession::new();
        session.merge_pong(&json!({
            "server": {"name": "pz"},
            "game": {"day": 1, "season": "summer"},
        }));
        session.merge_info(&json!({
            "players": [{"username": "Bob"}],
            "safeHouses": [],
            "game": {"day": 2},
        }));
        session.merge_info(&json!({
            "players": [{"username": "Alice"}],
            "game": {"hour": 7},
        }));

        let data = session.snapshot().data.unwrap();
        assert_eq!(data["server"], json!({"name": "pz"}));
        assert_eq!(data["game"], json!({"day": 2, "season": "summer", "hour": 7}));
        assert_eq!(data["players"], json!([{"username": "Alice"}]));
        assert!(data.get("safeHouses").is_none());
        assert_eq!(session.snapshot().online_usernames(), ["Alice"]);
    }

    #[test]
    fn status_starts_down_and_follows_updates() {
        let session = ServerSession::new();
        let watcher = session.subscribe_status();
        assert_eq!(session.status(), ServerStatus::Down);

        session.set_status(ServerStatus::Up);
        assert_eq!(*watcher.borrow(), ServerStatus::Up);
    }
}
