use thiserror::Error;

#[derive(Debug, Error)]
pub enum VoiceAgentError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VoiceAgentError>;
