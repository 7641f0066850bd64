use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopcastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Publisher error: {0}")]
    Publisher(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoopcastError {
    /// Short, stable error code for logs and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            LoopcastError::Config(_) => "CONFIG_ERROR",
            LoopcastError::Publisher(_) => "PUBLISHER_ERROR",
            LoopcastError::Serialization(_) => "SERIALIZATION_ERROR",
            LoopcastError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, LoopcastError>;
