//! Crate-wide error type

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Listener for '{event}' failed: {message}")]
    Listener { event: String, message: String },
    #[error("Invalid arguments for '{event}': {reason}")]
    InvalidArgs { event: String, reason: String },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TrackerError {
    pub fn listener(event: &str, err: &anyhow::Error) -> Self {
        TrackerError::Listener {
            event: event.to_string(),
            message: format!("{err:#}"),
        }
    }

    pub fn invalid_args(event: &str, reason: impl Into<String>) -> Self {
        TrackerError::InvalidArgs {
            event: event.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
