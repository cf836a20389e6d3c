//! Error handling for the chatsec client

use std::path::PathBuf;

use thiserror::Error;

use chatsec_core::{ChatError, CryptoError, ProtocolError};

/// Client-side error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Chat core error: {0}")]
    Core(#[from] ChatError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration loading error: {0}")]
    ConfigLoading(#[from] figment::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("Cannot read {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Identity persistence error: {0}")]
    IdentityPersistence(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Server refused the session: {0}")]
    Refused(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("This name is registered to another key; pick a different name")]
    UnknownServerKey,

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Connection closed by server")]
    ConnectionClosed,
}

impl From<CryptoError> for CliError {
    fn from(err: CryptoError) -> Self {
        CliError::Core(ChatError::Crypto(err))
    }
}

impl From<ProtocolError> for CliError {
    fn from(err: ProtocolError) -> Self {
        CliError::Core(ChatError::Protocol(err))
    }
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, CliError>;
