use std::io;
use thiserror::Error;

/// Custom error types for the messenger
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid callsign: {0}")]
    InvalidCallsign(String),

    #[error("Invalid text: {0}")]
    InvalidText(String),

    #[error("Message needs {packets} packets, at most {max} allowed", max = crate::core::MAX_PACKETS)]
    MessageTooLong { packets: usize },

    #[error("No contact selected")]
    NoContactSelected,

    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("Capacity exhausted: {0}")]
    Capacity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Channel error: {0}")]
    Channel(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new invalid callsign error
    pub fn invalid_callsign(msg: impl Into<String>) -> Self {
        Error::InvalidCallsign(msg.into())
    }

    /// Creates a new invalid text error
    pub fn invalid_text(msg: impl Into<String>) -> Self {
        Error::InvalidText(msg.into())
    }

    /// Creates a new unknown contact error
    pub fn unknown_contact(msg: impl Into<String>) -> Self {
        Error::UnknownContact(msg.into())
    }

    /// Creates a new capacity error
    pub fn capacity(msg: impl Into<String>) -> Self {
        Error::Capacity(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new persistence error
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    /// Creates a new channel error
    pub fn channel(msg: impl Into<String>) -> Self {
        Error::Channel(msg.into())
    }
}
