use axum::{Json, Router, extract::State, routing::post};
use validator::Validate;

use crate::{
    dto::command::{CommandAck, CommandRequest, ControlCommandRequest, ControlResponse},
    error::AppError,
    services::command_service,
    state::SharedState,
};

#[utoipa::path(
    post,
    path = "/command",
    tag = "commands",
    params(("x-api-key" = String, Header, description = "Shared API key")),
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Command queued for the game", body = CommandAck),
        (status = 400, description = "Invalid command"),
        (status = 503, description = "Bridge shutting down")
    )
)]
/// Queue a command for the game's command pipe.
pub async fn send_command(
    State(state): State<SharedState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandAck>, AppError> {
    request.validate()?;
    Ok(Json(command_service::send_command(&state, request)?))
}

#[utoipa::path(
    post,
    path = "/rcon",
    tag = "commands",
    params(("x-api-key" = String, Header, description = "Shared API key")),
    request_body = ControlCommandRequest,
    responses(
        (status = 200, description = "Remote console reply", body = ControlResponse),
        (status = 400, description = "Invalid command"),
        (status = 503, description = "Remote console unavailable")
    )
)]
/// Execute a command on the remote console.
pub async fn send_control_command(
    State(state): State<SharedState>,
    Json(request): Json<ControlCommandRequest>,
) -> Result<Json<ControlResponse>, AppError> {
    request.validate()?;
    Ok(Json(
        command_service::send_control_command(&state, request).await?,
    ))
}

/// Configure the command routes.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/command", post(send_command))
        .route("/rcon", post(send_control_command))
}
