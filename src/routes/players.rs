use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::player::{PlayerProjection, PlayerStatusResponse},
    error::AppError,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/players/{username}",
    tag = "players",
    params(
        ("username" = String, Path, description = "Case-sensitive player name"),
        ("x-api-key" = String, Header, description = "Shared API key")
    ),
    responses(
        (status = 200, description = "Reconciled player", body = PlayerProjection),
        (status = 404, description = "No snapshot for this player"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Fetch one player reconciled against the session and whitelist tables.
pub async fn get_player(
    State(state): State<SharedState>,
    Path(username): Path<String>,
) -> Result<Json<PlayerProjection>, AppError> {
    state
        .reconciler()
        .get_player(&username)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("player `{username}`")))
}

#[utoipa::path(
    get,
    path = "/players/{username}/status",
    tag = "players",
    params(
        ("username" = String, Path, description = "Case-sensitive player name"),
        ("x-api-key" = String, Header, description = "Shared API key")
    ),
    responses(
        (status = 200, description = "Derived player status", body = PlayerStatusResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Derive `NONE`, `ALIVE`, `DEAD` or `BANNED` for a player.
pub async fn get_player_status(
    State(state): State<SharedState>,
    Path(username): Path<String>,
) -> Result<Json<PlayerStatusResponse>, AppError> {
    let status = state.reconciler().get_status(&username).await?;
    Ok(Json(PlayerStatusResponse { username, status }))
}

/// Configure the player routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/players/{username}", get(get_player))
        .route("/players/{username}/status", get(get_player_status))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{dto::player::PlayerStatus, state::test_support};

    #[tokio::test]
    async fn unknown_player_is_not_found_but_has_a_status() {
        let (state, _tables) = test_support::state().await;
        let result = get_player(State(state.clone()), Path("Ghost".into())).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));

        let Json(status) = get_player_status(State(state), Path("Ghost".into()))
            .await
            .unwrap();
        assert_eq!(status.status, PlayerStatus::None);
    }

    #[tokio::test]
    async fn banned_player_is_reported_banned() {
        let (state, tables) = test_support::state().await;
        state
            .reconciler()
            .upsert_player(json!({"username": "Bob"}))
            .await
            .unwrap();
        tables.insert_session("Bob", 0).await;
        tables.insert_whitelist("Bob", "true", None).await;

        let Json(player) = get_player(State(state.clone()), Path("Bob".into()))
            .await
            .unwrap();
        assert!(player.banned);

        let Json(status) = get_player_status(State(state), Path("Bob".into()))
            .await
            .unwrap();
        assert_eq!(status.status, PlayerStatus::Banned);
    }
}
