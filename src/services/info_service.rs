use std::collections::HashSet;

use serde_json::Value;
use tracing::warn;

use crate::{
    dto::{info::InfoResponse, player::InfoPlayer},
    error::ServiceError,
    state::SharedState,
};

/// Build the `/info` payload: the merged server data with its `players` list replaced by the
/// reconciled projection of every known player, each flagged with whether it is online and
/// carrying its latest game session row when there is one.
pub async fn get_info(state: &SharedState) -> Result<InfoResponse, ServiceError> {
    let status = state.session().status();
    let server = state.session().snapshot();
    let online: HashSet<String> = server.online_usernames().into_iter().collect();
    let last_updated = server.last_updated;
    let Some(mut data) = server.data else {
        return Ok(InfoResponse {
            data: None,
            last_updated,
            status,
        });
    };

    let players: Vec<InfoPlayer> = state
        .reconciler()
        .list_players_with_sessions()
        .await?
        .into_iter()
        .map(|(player, session)| {
            let online = player.username().is_some_and(|name| online.contains(name));
            InfoPlayer::new(player, online, session.as_ref())
        })
        .collect();

    if let Value::Object(map) = &mut data {
        map.insert("players".into(), encode_players(&players)?);
    }

    Ok(InfoResponse {
        data: Some(data),
        last_updated,
        status,
    })
}

fn encode_players(players: &[InfoPlayer]) -> Result<Value, ServiceError> {
    serde_json::to_value(players).map_err(|source| {
        warn!(error = %source, "failed to encode info players");
        ServiceError::Encoding {
            what: "info players",
            source,
        }
    })
}
