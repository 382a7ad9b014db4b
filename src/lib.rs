//! Library crate for the BrainSlug bridge, exposing modules for binaries and integration tests.
//!
//! The bridge talks to a Project Zomboid server through two files (a command pipe it writes and
//! an event pipe it watches) and through the remote console, reconciles player state against the
//! game's own tables, and serves the result over HTTP and WebSocket.

pub mod config;
pub mod control;
/// Game tables and the Snapshot Store.
pub mod dao;
/// Payloads exchanged with HTTP and WebSocket clients.
pub mod dto;
/// Errors returned by services and their HTTP mapping.
pub mod error;
pub mod pipe;
/// HTTP and WebSocket routes.
pub mod routes;
/// Business logic behind the routes.
pub mod services;
/// Shared application state.
pub mod state;
