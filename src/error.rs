//! Error types for StreamVoice

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamVoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Invalid sound resource {resource_id} ({name}): {reason}")]
    InvalidResource {
        resource_id: u64,
        name: String,
        reason: String,
    },

    #[error("Voice error in {call}: {message}")]
    Voice { call: &'static str, message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StreamVoiceError {
    pub(crate) fn voice(call: &'static str, message: impl Into<String>) -> Self {
        Self::Voice {
            call,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamVoiceError>;
