use tracing::info;
use validator::Validate;

use crate::{
    dto::command::{CommandAck, CommandRequest, ControlCommandRequest, ControlResponse},
    error::ServiceError,
    state::SharedState,
};

/// Queue `request` for the game's command pipe and echo it back.
///
/// Delivery is fire-and-forget: the acknowledgement only means the supervisor accepted it.
pub fn send_command(
    state: &SharedState,
    request: CommandRequest,
) -> Result<CommandAck, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    if state.is_shutting_down() {
        return Err(ServiceError::ShuttingDown);
    }

    info!(command = %request.command, "forwarding game command");
    state.supervisor().send_command(request.clone().into())?;
    Ok(CommandAck::new(request))
}

/// Execute `request` on the remote console and return its reply text.
pub async fn send_control_command(
    state: &SharedState,
    request: ControlCommandRequest,
) -> Result<ControlResponse, ServiceError> {
    request
        .validate()
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;

    let response = state
        .control()
        .send(&request.command, &request.args)
        .await?;
    Ok(ControlResponse { response })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{control::ControlError, state::test_support};

    #[tokio::test]
    async fn accepted_commands_are_echoed() {
        let (state, _tables) = test_support::state().await;
        let ack = send_command(
            &state,
            CommandRequest {
                command: "setWeather".into(),
                payload: Some(json!({"rain": true})),
            },
        )
        .unwrap();

        let value = serde_json::to_value(ack).unwrap();
        assert_eq!(
            value,
            json!({"type": "COMMAND", "payload": {"command": "setWeather", "payload": {"rain": true}}})
        );
    }

    #[tokio::test]
    async fn commands_are_refused_after_shutdown() {
        let (state, _tables) = test_support::state().await;
        state.shutdown().await;
        let result = send_command(
            &state,
            CommandRequest {
                command: "players".into(),
                payload: None,
            },
        );
        assert!(matches!(result, Err(ServiceError::ShuttingDown)));
    }

    #[tokio::test]
    async fn blank_commands_are_invalid() {
        let (state, _tables) = test_support::state().await;
        let result = send_control_command(
            &state,
            ControlCommandRequest {
                command: String::new(),
                args: Vec::new(),
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn control_commands_need_a_connection() {
        let (state, _tables) = test_support::state().await;
        let result = send_control_command(
            &state,
            ControlCommandRequest {
                command: "players".into(),
                args: Vec::new(),
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(ServiceError::ControlChannel(ControlError::NotConnected))
        ));
    }
}
