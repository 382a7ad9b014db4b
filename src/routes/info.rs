use axum::{Json, Router, extract::State, routing::get};

use crate::{
    dto::info::InfoResponse, error::AppError, services::info_service, state::SharedState,
};

#[utoipa::path(
    get,
    path = "/info",
    tag = "server",
    params(("x-api-key" = String, Header, description = "Shared API key")),
    responses(
        (status = 200, description = "Merged server data with reconciled players", body = InfoResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Return the live server view with every known player reconciled.
pub async fn get_info(State(state): State<SharedState>) -> Result<Json<InfoResponse>, AppError> {
    Ok(Json(info_service::get_info(&state).await?))
}

/// Configure the server view route.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/info", get(get_info))
}
