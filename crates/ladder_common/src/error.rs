//! Error types for the ladder engine.
//!
//! Missing keys are not errors: the KV client returns `Option` and callers
//! treat absence as zero. Overflow/negative values are healer outcomes, not
//! errors either.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LadderError>;

#[derive(Error, Debug)]
pub enum LadderError {
    /// Timeout, connection failure or 5xx. Abort the tick, retry next schedule.
    #[error("Transient KV error: {0}")]
    Transient(String),

    #[error("KV backend error: {0}")]
    Backend(String),

    #[error("Malformed value at '{key}': {value:?}")]
    Malformed { key: String, value: String },

    #[error("Unexpected reply to {command}: {reply}")]
    UnexpectedReply { command: String, reply: String },

    #[error("Invalid ladder table: {0}")]
    InvalidLadder(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl LadderError {
    pub fn malformed(key: &str, value: &str) -> Self {
        LadderError::Malformed {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    pub fn unexpected(command: &str, reply: impl std::fmt::Display) -> Self {
        LadderError::UnexpectedReply {
            command: command.to_string(),
            reply: reply.to_string(),
        }
    }

    /// Errors worth retrying on the next scheduled tick without attention.
    pub fn is_transient(&self) -> bool {
        matches!(self, LadderError::Transient(_))
    }
}

impl From<reqwest::Error> for LadderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return LadderError::Transient(err.to_string());
        }
        if let Some(status) = err.status() {
            if status.is_server_error() {
                return LadderError::Transient(err.to_string());
            }
        }
        if err.is_decode() {
            return LadderError::Backend(format!("undecodable reply: {}", err));
        }
        LadderError::Backend(err.to_string())
    }
}
