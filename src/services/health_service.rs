use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Check storage and report it together with game liveness and the control-channel state.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let storage_ok = match state.reconciler().health_check().await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    HealthResponse::from_checks(storage_ok, state.session().status(), state.control().state())
}
