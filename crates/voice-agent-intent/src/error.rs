use thiserror::Error;

#[derive(Debug, Error)]
pub enum NluError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid rule file: {0}")]
    Rules(String),

    #[error("intent service error: {0}")]
    Service(String),
}

/// Why an intent could not be turned into signal actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("intent '{0}' is not supported")]
    IntentNotSupported(String),

    #[error("intent '{intent}' is missing slot '{slot}'")]
    SlotsIncomplete { intent: String, slot: String },
}
