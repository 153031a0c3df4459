//! Error types for the Boneheart agent

use boneheart_voice::VoiceError;
use thiserror::Error;

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing secret: {0} is not set")]
    MissingSecret(&'static str),

    #[error("Voice error: {0}")]
    Voice(#[from] VoiceError),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Vision error: {0}")]
    Vision(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Llm(err.to_string())
    }
}
