use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Planning model error: {0}")]
    Planning(String),

    #[error("Invalid model response: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A task is already running")]
    AlreadyRunning,

    #[error("Capability not available: {0}")]
    Unavailable(&'static str),
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
