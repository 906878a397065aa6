//! Error types shared across the stage.

use thiserror::Error;

/// Errors raised while fetching, decoding, playing or presenting agent audio.
#[derive(Error, Debug)]
pub enum StageError {
    /// Audio reference unreachable or returned something other than audio bytes
    #[error("Failed to fetch audio {reference}: {reason}")]
    ResourceFetch { reference: String, reason: String },

    /// Bytes were fetched but are not a supported audio container
    #[error("Failed to decode audio {reference}: {reason}")]
    Decode { reference: String, reason: String },

    /// Output device missing or stream could not be started
    #[error("Audio output error: {0}")]
    Output(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Event channel error: {0}")]
    Transport(String),

    #[error("Render error: {0}")]
    Render(String),
}

pub type Result<T> = std::result::Result<T, StageError>;
