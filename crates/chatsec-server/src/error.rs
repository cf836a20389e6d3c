//! Error handling for the chat server binary and runtime

use thiserror::Error;

use chatsec_core::{ChatError, CryptoError};

/// Server-level error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Chat core error: {0}")]
    Core(#[from] ChatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration loading error: {0}")]
    ConfigLoading(#[from] figment::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),
}

impl From<CryptoError> for ServerError {
    fn from(err: CryptoError) -> Self {
        ServerError::Core(ChatError::Crypto(err))
    }
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
