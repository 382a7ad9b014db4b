//! Environment-driven runtime configuration.
//!
//! Every deployment-specific value is required unless the `DEBUG` override is set, in which case
//! local development defaults are filled in instead. Missing values are collected so startup
//! fails once with the complete list.

use std::{env, path::PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::pipe::ReadMode;

const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_CONTROL_PORT: u16 = 27015;
const DEFAULT_SNAPSHOT_DB: &str = "./exportedPlayers.db";
/// Mod directory the game writes its pipes into, relative to the home directory.
const DEFAULT_PIPE_DIR: &str = "Zomboid/mods/BrainSlug";

/// Failures detected while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required variables are absent.
    #[error("missing required environment variable(s): {}", vars.join(", "))]
    Missing {
        /// Names of the absent variables.
        vars: Vec<&'static str>,
    },
    /// A variable is present but cannot be parsed.
    #[error("invalid value `{value}` for `{var}`: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Raw value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Location of both game pipes and how the event pipe is read.
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// File the bridge writes commands to.
    pub inpipe: PathBuf,
    /// File the game writes events to.
    pub outpipe: PathBuf,
    /// How the event file is reread after a change.
    pub read_mode: ReadMode,
}

/// Location of the Snapshot Store and of the game-owned databases.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// SQLite file owned by the bridge.
    pub snapshot_db: PathBuf,
    /// `None` only in debug mode; an empty stand-in table is used instead.
    pub sessions_db: Option<PathBuf>,
    /// Game whitelist database; `None` only in debug mode.
    pub whitelist_db: Option<PathBuf>,
}

/// Remote console endpoint.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Remote console host name or address.
    pub host: String,
    /// Remote console TCP port.
    pub port: u16,
    /// Remote console password.
    pub password: String,
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Relaxed checks and verbose logging.
    pub debug: bool,
    /// Port the HTTP server listens on.
    pub http_port: u16,
    /// Game pipe locations.
    pub pipes: PipeConfig,
    /// Database locations.
    pub storage: StorageConfig,
    /// Remote console endpoint.
    pub control: ControlConfig,
    /// `None` only in debug mode, where the API-key check is disabled.
    pub api_key: Option<String>,
}

impl AppConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_lookup(|var| env::var(var).ok())?;
        if config.debug && config.api_key.is_none() {
            warn!("debug mode without API_KEY: requests are not authenticated");
        }
        Ok(config)
    }

    /// Build the configuration from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());
        let debug = get("DEBUG").is_some();
        let mut missing = Vec::new();
        let mut require = |var: &'static str| {
            let value = get(var);
            if value.is_none() && !debug {
                missing.push(var);
            }
            value
        };

        let inpipe = require("INPIPE_FILE_NAME");
        let outpipe = require("OUTPIPE_FILE_NAME");
        let snapshot_db = require("EXPORTED_PLAYERS_DB");
        let sessions_db = require("PZ_PLAYERS_DB");
        let whitelist_db = require("PZ_WHITELIST_DB");
        let control_host = require("RCON_HOST");
        let control_port = require("RCON_PORT");
        let control_password = require("RCON_PW");
        let api_key = require("API_KEY");

        if !missing.is_empty() {
            return Err(ConfigError::Missing { vars: missing });
        }

        let pipe_dir = get("HOME")
            .map(|home| PathBuf::from(home).join(DEFAULT_PIPE_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PIPE_DIR));

        let read_mode = match get("OUTPIPE_READ_MODE") {
            Some(value) => value.parse().map_err(|reason| ConfigError::Invalid {
                var: "OUTPIPE_READ_MODE",
                value,
                reason,
            })?,
            None => ReadMode::default(),
        };

        let http_port = match get("PORT").or_else(|| get("EXPRESS_PORT")) {
            Some(value) => parse_port("PORT", value)?,
            None => DEFAULT_HTTP_PORT,
        };
        let control_port = match control_port {
            Some(value) => parse_port("RCON_PORT", value)?,
            None => DEFAULT_CONTROL_PORT,
        };

        Ok(Self {
            debug,
            http_port,
            pipes: PipeConfig {
                inpipe: inpipe
                    .map(PathBuf::from)
                    .unwrap_or_else(|| pipe_dir.join("inpipe")),
                outpipe: outpipe
                    .map(PathBuf::from)
                    .unwrap_or_else(|| pipe_dir.join("outpipe")),
                read_mode,
            },
            storage: StorageConfig {
                snapshot_db: PathBuf::from(
                    snapshot_db.unwrap_or_else(|| DEFAULT_SNAPSHOT_DB.into()),
                ),
                sessions_db: sessions_db.map(PathBuf::from),
                whitelist_db: whitelist_db.map(PathBuf::from),
            },
            control: ControlConfig {
                host: control_host.unwrap_or_else(|| "localhost".into()),
                port: control_port,
                password: control_password.unwrap_or_default(),
            },
            api_key,
        })
    }
}

fn parse_port(var: &'static str, value: String) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|err| ConfigError::Invalid {
        var,
        value,
        reason: err.to_string(),
    })
}
