use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("recognizer engine error: {0}")]
    Engine(String),

    #[error("no local engine configured for '{0}'")]
    NoEngine(String),

    #[error("unknown recognizer: {0}")]
    UnknownRecognizer(String),

    #[error("remote transcription error: {0}")]
    Remote(String),

    #[error("playback error: {0}")]
    Playback(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;
