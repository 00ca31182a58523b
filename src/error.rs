//! Error types for agentrelay.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl From<axum::Error> for Error {
    fn from(e: axum::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
