use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::dto::info::InfoResponse;

#[derive(Debug, Deserialize, ToSchema)]
/// Messages accepted from dashboard WebSocket clients.
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientInboundMessage {
    /// Forward a command to the game through the command pipe.
    Command {
        /// Command name understood by the game mod.
        command: String,
        /// Free-form arguments.
        #[serde(default)]
        #[schema(value_type = Option<Object>)]
        payload: Option<Value>,
    },
    /// Execute a command on the remote console.
    Rcon {
        /// Remote console command name.
        command: String,
        /// Ordered arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Any other message type; ignored.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to dashboard WebSocket clients.
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientOutboundMessage {
    /// Periodic server information.
    Info(InfoResponse),
    /// Text returned by the remote console.
    RconResponse(String),
    /// The remote console command failed.
    RconError(String),
    /// The command could not be forwarded to the game.
    CommandError(String),
}
