use axum::{Router, middleware};

use crate::state::SharedState;

/// API-key middleware.
pub mod auth;
/// Game and remote console commands.
pub mod command;
/// Swagger UI.
pub mod docs;
/// Health check.
pub mod health;
/// Live server view.
pub mod info;
/// Player lookups.
pub mod players;
/// Dashboard WebSocket.
pub mod websocket;

/// Compose all route trees. Everything except health and docs requires the API key.
pub fn router(state: SharedState) -> Router<()> {
    let protected = info::router()
        .merge(players::router())
        .merge(command::router())
        .merge(websocket::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    let docs_router = docs::router(state.clone());

    health::router()
        .merge(protected)
        .merge(docs_router)
        .with_state(state)
}
