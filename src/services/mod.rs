/// Game and remote-console command forwarding.
pub mod command_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Live server view with reconciled players.
pub mod info_service;
/// Player reconciliation across the snapshot, session and whitelist tables.
pub mod reconciliation;
/// WebSocket connection handling and periodic info pushes.
pub mod websocket_service;
