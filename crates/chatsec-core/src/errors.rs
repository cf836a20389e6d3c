//! Error types for the chatsec protocol
//!
//! This module contains the error taxonomy shared by the server and the client
//! driver: protocol errors, authentication failures, replay detection, registry
//! refusals, crypto-engine failures and connection I/O errors, unified under
//! [`ChatError`].

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Crypto engine failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Block size error: expected {expected} bytes, got {actual}")]
    BlockSize { expected: usize, actual: usize },
    #[error("Invalid key material: {reason}")]
    InvalidKey { reason: String },
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },
    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },
    #[error("Key generation failed: {reason}")]
    KeyGenerationFailed { reason: String },
    #[error("Random number generation failed")]
    RandomGenerationFailed,
}

/// Malformed or out-of-context protocol input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Missing sequence number")]
    MissingSequence,
    #[error("Invalid sequence number: {value}")]
    InvalidSequence { value: String },
    #[error("Incomplete command, usage: {usage}")]
    IncompleteCommand { usage: &'static str },
    #[error("Invalid base64 payload")]
    InvalidBase64,
    #[error("Invalid public key line")]
    InvalidPublicKey,
    #[error("BUFFER received outside file transfer context from {sender}")]
    BufferWithoutHeader { sender: String },
    #[error("End of transfer without a pending transfer")]
    EndWithoutTransfer,
    #[error("Pending transfer goes to {expected}, not {target}")]
    TransferTargetMismatch { expected: String, target: String },
    #[error("Invalid file name: {filename}")]
    InvalidFileName { filename: String },
    #[error("Line too long ({length} bytes, max {max})")]
    LineTooLong { length: usize, max: usize },
    #[error("{message}")]
    Generic { message: String },
}

impl From<String> for ProtocolError {
    fn from(message: String) -> Self {
        ProtocolError::Generic { message }
    }
}

impl From<&str> for ProtocolError {
    fn from(message: &str) -> Self {
        ProtocolError::Generic {
            message: message.to_string(),
        }
    }
}

/// Authentication handshake failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Challenge response mismatch for {name}")]
    ChallengeMismatch { name: String },
    #[error("Crypto engine failure during authentication of {name}: {source}")]
    Engine {
        name: String,
        #[source]
        source: CryptoError,
    },
    #[error("Invalid name {name}")]
    InvalidName { name: String },
}

/// Session registry refusals
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Pseudo {name} is already connected")]
    NameInUse { name: String },
    #[error("Maximum sessions reached: {current}/{max}")]
    CapacityExceeded { current: usize, max: usize },
    #[error("Session not found: {name}")]
    SessionNotFound { name: String },
    #[error("Pseudo {name} is already registered")]
    CredentialInUse { name: String },
}

// ----------------------------------------------------------------------------
// Umbrella Error
// ----------------------------------------------------------------------------

/// Core error type for the chatsec protocol
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication failure: {0}")]
    Authentication(#[from] AuthError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Crypto engine error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Connection I/O error: {0}")]
    ConnectionIo(#[from] std::io::Error),

    #[error("Transfer sink error for {sender}: {source}")]
    TransferIo {
        sender: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl ChatError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        ChatError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a transfer sink error
    pub fn transfer_io<T: Into<String>>(sender: T, source: std::io::Error) -> Self {
        ChatError::TransferIo {
            sender: sender.into(),
            source,
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, ChatError>;
