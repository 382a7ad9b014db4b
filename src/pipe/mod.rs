//! Named-pipe IPC with the game process.
//!
//! Two workers own one pipe direction each and talk to the [`supervisor`] over typed channels:
//! the inbound worker writes commands to the game, the outbound worker forwards whatever the
//! game wrote to its event pipe.

mod inbound;
mod outbound;
mod reader;
mod refresh;
pub mod supervisor;
mod workers;

use std::{fmt, io, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use reader::PipeReader;
pub use supervisor::{SupervisorHandle, SupervisorTimings};
pub use workers::{PipeWorkers, WorkerFactory, WorkerLink};

/// One command written to the inbound pipe as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameCommand {
    /// Command name understood by the game mod.
    pub command: String,
    /// Arguments, omitted from the line when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl GameCommand {
    /// Command without payload, such as `ping` or `info`.
    pub fn bare(command: &str) -> Self {
        Self {
            command: command.to_string(),
            payload: None,
        }
    }
}

/// One event document read from the outbound pipe.
#[derive(Debug, Clone, Deserialize)]
pub struct GameEvent {
    /// Event name such as `pong` or `info`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event body; `null` when the game sent none.
    #[serde(default)]
    pub data: Value,
}

/// How the outbound worker reads the event pipe after a change notification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Reread the whole file on every change.
    #[default]
    WholeFile,
    /// Forward only complete lines appended since the previous read.
    Tail,
}

impl FromStr for ReadMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whole-file" | "whole_file" | "wholefile" => Ok(ReadMode::WholeFile),
            "tail" => Ok(ReadMode::Tail),
            other => Err(format!("expected `whole-file` or `tail`, got `{other}`")),
        }
    }
}

/// Which pipe direction a worker owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    /// Writes commands to the game.
    Inbound,
    /// Watches the event file.
    Outbound,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Inbound => f.write_str("inbound"),
            WorkerKind::Outbound => f.write_str("outbound"),
        }
    }
}

/// Message sent from the supervisor to a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerControl {
    /// Write a command to the game. Only the inbound worker acts on it.
    Command(GameCommand),
    /// Release the pipe and return.
    Stop,
}

/// Message sent from a worker to the supervisor.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// The worker opened its pipe and is ready to serve.
    Ready,
    /// A write failed; the worker is reopening the pipe.
    PipeError(String),
    /// Raw bytes read from the event pipe, possibly several JSON lines.
    Payload(String),
    /// A read failed; the worker keeps watching.
    Reopening,
}

/// Failure inside a pipe worker. Workers report it on exit; it never reaches external callers.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The pipe could not be opened.
    #[error("failed to open pipe `{path}`")]
    Open {
        /// Pipe file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Writing a command failed.
    #[error("failed to write pipe `{path}`")]
    Write {
        /// Pipe file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Reading the event file failed.
    #[error("failed to read pipe `{path}`")]
    Read {
        /// Pipe file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The change watcher could not be installed.
    #[error("failed to watch pipe `{path}`")]
    Watch {
        /// Pipe file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: notify::Error,
    },
    /// The change watcher went away.
    #[error("file watcher for `{path}` stopped delivering events")]
    WatcherClosed {
        /// Pipe file being watched.
        path: PathBuf,
    },
}
