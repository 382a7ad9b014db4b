//! Remote-console (control channel) client.
//!
//! [`ControlClient`] keeps one connection alive with a fixed retry interval and exposes a single
//! request/response call. The byte-level protocol sits behind [`ControlConnector`] so the
//! reconnect logic does not depend on it.

mod client;
mod protocol;

use std::io;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub use client::ControlClient;
pub use protocol::{RconConnection, RconConnector};

/// Connection state of the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlState {
    /// No connection, waiting for the next attempt.
    Disconnected,
    /// Connecting and authenticating.
    Connecting,
    /// Authenticated and ready for commands.
    Connected,
    /// The last attempt or connection failed.
    Error,
    /// Absorbing: once entered no reconnect is attempted.
    ShuttingDown,
}

/// Failure of a control-channel operation.
#[derive(Debug, Error)]
pub enum ControlError {
    /// TCP connect failed.
    #[error("could not connect to {addr}")]
    Connect {
        /// `host:port` that was dialed.
        addr: String,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The server refused the connection.
    #[error("connection refused by {addr}")]
    Refused {
        /// `host:port` that was dialed.
        addr: String,
    },
    /// Wrong password.
    #[error("remote console rejected the password")]
    AuthRejected,
    /// Read or write failed on an open connection.
    #[error("control channel i/o failed")]
    Io(#[from] io::Error),
    /// Malformed or unexpected packet.
    #[error("unexpected remote console reply: {0}")]
    Protocol(String),
    /// No reply within the command timeout.
    #[error("remote console did not answer in time")]
    Timeout,
    /// No connection is open right now.
    #[error("control channel is not connected")]
    NotConnected,
    /// The client was stopped.
    #[error("control channel is shutting down")]
    ShuttingDown,
}

/// Opens authenticated connections to the remote console.
pub trait ControlConnector: Send + Sync {
    /// Connect and authenticate.
    fn connect(&self) -> BoxFuture<'static, Result<Box<dyn ControlConnection>, ControlError>>;
}

/// One open remote-console connection. Exchanges are strictly one at a time.
pub trait ControlConnection: Send {
    /// Send one command line and return the reply text.
    fn exec<'a>(&'a mut self, line: &'a str) -> BoxFuture<'a, Result<String, ControlError>>;
    /// Resolves when the server ends the connection: `Ok` for a clean end, `Err` for a failure.
    /// Dropping the future must not lose bytes of a later reply.
    fn closed(&mut self) -> BoxFuture<'_, Result<(), ControlError>>;
    /// Shut the connection down from our side.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Build the command line: the command followed by its arguments, quoting any argument that
/// contains whitespace so it stays one token.
pub fn format_command(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        if arg.is_empty() || arg.chars().any(char::is_whitespace) {
            line.push('"');
            for ch in arg.chars() {
                if ch == '"' || ch == '\\' {
                    line.push('\\');
                }
                line.push(ch);
            }
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}
