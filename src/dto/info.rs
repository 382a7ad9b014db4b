use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::dao::models::TimestampMs;

/// Liveness of the game process as established by the ping/pong handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    /// The game answered `pong`.
    Up,
    /// No answer yet, or the pipes failed.
    Down,
}

/// Payload of `/info` and of the websocket `info` push.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    /// Merged server data with `players` replaced by reconciled projections.
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    /// Time the last `info` event carrying players was processed.
    #[serde(serialize_with = "crate::dto::rfc3339::option::serialize")]
    #[schema(value_type = Option<String>)]
    pub last_updated: Option<TimestampMs>,
    /// Game liveness.
    pub status: ServerStatus,
}
