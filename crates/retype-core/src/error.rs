use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetypeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The OS keyboard hook could not be attached.
    #[error("Keyboard hook error: {0}")]
    HookInit(String),
    /// Simulated input failed part-way through a replacement.
    #[error("Keyboard simulation error: {0}")]
    Simulation(String),
    /// Event processing panicked inside the capture loop.
    #[error("Key event callback failed: {0}")]
    Callback(String),
    #[error("Invalid rule: {0}")]
    InvalidRule(String),
    #[error("Keyword '{0}' already exists")]
    RuleExists(String),
    #[error("Keyword '{0}' not found")]
    RuleNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, RetypeError>;
