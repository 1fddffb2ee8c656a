//! Error types for the backup agent.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration. Fatal to the run, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external stage binary (tar, split, openssl) failed.
    #[error("Command error: {0}")]
    Command(String),

    /// Connection, auth or timeout failure against a destination.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

pub type Result<T> = std::result::Result<T, Error>;
