//! # Bot Error Types
//!
//! Every variant is fatal to the process except where a caller explicitly
//! recovers (a 404 on delete never becomes an error in the first place).

use http::{Method, StatusCode};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result type alias for bot operations
pub type BotResult<T> = Result<T, BotError>;

#[derive(Error, Debug)]
pub enum BotError {
    /// The HTTP request never produced a response.
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The gateway socket failed.
    #[error("gateway transport error: {0}")]
    Gateway(#[source] Box<tungstenite::Error>),

    /// A REST call returned a status the caller does not tolerate.
    #[error("{operation} failed with status {status}")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusCode,
    },

    /// The rate limit retry budget ran out.
    #[error("rate limited {attempts} times on {method} {path}; giving up")]
    RetriesExhausted {
        method: Method,
        path: String,
        attempts: u32,
    },

    /// A payload could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The gateway connection ended.
    #[error("gateway closed: {reason}")]
    GatewayClosed { reason: String },

    /// The server asked for a reconnect or rejected the session.
    #[error("gateway session ended by server (op {op})")]
    SessionInvalidated { op: u8 },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A background task panicked or was aborted.
    #[error("{task} task failed: {message}")]
    TaskFailed { task: &'static str, message: String },

    /// The scheduler worker is gone.
    #[error("deletion scheduler stopped")]
    SchedulerStopped,
}

impl BotError {
    /// Wrap an arbitrary transport failure.
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport {
            source: Box::new(error),
        }
    }

    /// Create a new malformed payload error
    pub fn malformed<T: Into<String>>(message: T) -> Self {
        Self::Malformed(message.into())
    }

    /// Create a new gateway closed error
    pub fn closed<T: Into<String>>(reason: T) -> Self {
        Self::GatewayClosed {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        Self::transport(err)
    }
}

impl From<tungstenite::Error> for BotError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Gateway(Box::new(err))
    }
}

impl From<serde_json::Error> for BotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}
