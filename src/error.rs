//! Error types for the link grabber

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bot token not specified (use -t, DISCORD_BOT_TOKEN or bot_token in the config file)")]
    MissingToken,

    #[error("No channels specified")]
    NoChannels,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Config file error: {0}")]
    ConfigFile(String),

    #[error("Discord rejected the bot token (401 Unauthorized)")]
    Unauthorized,

    #[error("Missing access to channel {0} (403 Forbidden)")]
    Forbidden(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    #[error("Rate limited by Discord, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Discord returned HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to acquire output lock: {0}")]
    LockError(String),

    #[error("Output file {0} is being written by another process")]
    OutputLocked(String),

    #[error("Line consumer went away before channel {0} finished")]
    ChannelClosed(String),

    #[error("Scrape task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether retrying the same request could succeed.
    ///
    /// Credential and unknown-channel failures are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::RateLimited { .. } => true,
            Error::Http { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
