use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the BrainSlug bridge.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::info::get_info,
        crate::routes::players::get_player,
        crate::routes::players::get_player_status,
        crate::routes::command::send_command,
        crate::routes::command::send_control_command,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::info::InfoResponse,
            crate::dto::info::ServerStatus,
            crate::dto::player::PlayerProjection,
            crate::dto::player::InfoPlayer,
            crate::dto::player::PlayerStatus,
            crate::dto::player::PlayerStatusResponse,
            crate::dto::command::CommandRequest,
            crate::dto::command::CommandAck,
            crate::dto::command::ControlCommandRequest,
            crate::dto::command::ControlResponse,
            crate::dto::ws::ClientInboundMessage,
            crate::dto::ws::ClientOutboundMessage,
            crate::control::ControlState,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "server", description = "Live game server view"),
        (name = "players", description = "Reconciled player state"),
        (name = "commands", description = "Commands for the game and the remote console"),
        (name = "dashboard", description = "WebSocket pushes for dashboards"),
    )
)]
/// OpenAPI document for every route.
pub struct ApiDoc;
