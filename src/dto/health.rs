use serde::Serialize;
use utoipa::ToSchema;

use crate::{control::ControlState, dto::info::ServerStatus};

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "ok" when storage answers and the game handshake succeeded, "degraded" otherwise.
    pub status: String,
    /// Game liveness as seen through the pipes.
    pub game: ServerStatus,
    /// Remote console connection state.
    pub control: ControlState,
}

impl HealthResponse {
    /// Build the response from the individual checks.
    pub fn from_checks(storage_ok: bool, game: ServerStatus, control: ControlState) -> Self {
        let status = if storage_ok && game == ServerStatus::Up {
            "ok"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            game,
            control,
        }
    }
}
