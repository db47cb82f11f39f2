use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeterError {
    #[error("No command given to measure")]
    EmptyCommand,

    #[error("Run interrupted by user; subject process killed")]
    Interrupted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to register signal handler: {0}")]
    SignalHandler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, MeterError>;
