//! Request and response payloads for commands sent to the game.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use crate::pipe::GameCommand;

/// Command forwarded to the game through the command pipe.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema, Validate)]
pub struct CommandRequest {
    /// Command name understood by the game mod.
    #[validate(length(min = 1, max = 128))]
    pub command: String,
    /// Free-form arguments passed along unchanged.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub payload: Option<Value>,
}

impl From<CommandRequest> for GameCommand {
    fn from(value: CommandRequest) -> Self {
        GameCommand {
            command: value.command,
            payload: value.payload,
        }
    }
}

/// Echo of an accepted command. Acceptance says nothing about the game having applied it.
#[derive(Debug, Serialize, ToSchema)]
pub struct CommandAck {
    /// Always `COMMAND`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The accepted command.
    pub payload: CommandRequest,
}

impl CommandAck {
    /// Acknowledge `payload`.
    pub fn new(payload: CommandRequest) -> Self {
        Self {
            kind: "COMMAND".into(),
            payload,
        }
    }
}

/// Command executed on the remote console.
#[derive(Debug, Clone, Deserialize, ToSchema, Validate)]
pub struct ControlCommandRequest {
    /// Remote console command name.
    #[validate(length(min = 1, max = 128))]
    pub command: String,
    /// Ordered arguments; an argument containing spaces stays a single token.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Text returned by the remote console.
#[derive(Debug, Serialize, ToSchema)]
pub struct ControlResponse {
    /// Reply text, possibly empty.
    pub response: String,
}
