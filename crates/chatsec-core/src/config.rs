//! Configuration for the chat server and the client driver
//!
//! Plain serde structs with the stock deployment defaults. Layered
//! loading (files, environment, command line) lives in the binaries.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crypto::DEFAULT_KEY_BITS;
use crate::errors::{ChatError, Result};
use crate::protocol::file_transfer::DEFAULT_CHUNK_SIZE;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Default TCP port
pub const DEFAULT_PORT: u16 = 2222;

/// Default maximum number of simultaneous sessions
pub const DEFAULT_MAX_SESSIONS: usize = 3;

/// Default challenge size in bytes
pub const DEFAULT_CHALLENGE_SIZE: usize = 128;

/// Default per-session outbound queue depth (lines)
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Default maximum inbound line length (64KB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Default client identity file
pub const DEFAULT_IDENTITY_FILE: &str = "chatsec-identity.toml";

// ----------------------------------------------------------------------------
// Server Configuration
// ----------------------------------------------------------------------------

/// Chat server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener on
    pub bind_address: String,
    /// TCP port
    pub port: u16,
    /// Maximum simultaneous sessions (authenticated or not)
    pub max_sessions: usize,
    /// Size of the random challenge, must match the engine block size
    pub challenge_size: usize,
    /// Server key size in bits
    pub key_bits: usize,
    /// Lines queued per session before new ones are dropped
    pub outbound_buffer: usize,
    /// Longest accepted inbound line in bytes
    pub max_line_length: usize,
    /// Close connections that have not authenticated within this many seconds
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            challenge_size: DEFAULT_CHALLENGE_SIZE,
            key_bits: DEFAULT_KEY_BITS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            handshake_timeout_secs: None,
        }
    }
}

impl ServerConfig {
    /// `bind_address:port`
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bind_address.trim().is_empty() {
            return Err(ChatError::config_error("Bind address cannot be empty"));
        }
        if self.max_sessions == 0 {
            return Err(ChatError::config_error("Max sessions cannot be zero"));
        }
        if self.challenge_size == 0 {
            return Err(ChatError::config_error("Challenge size cannot be zero"));
        }
        if self.key_bits == 0 || self.key_bits % 8 != 0 {
            return Err(ChatError::config_error(
                "Key size must be a non-zero multiple of 8 bits",
            ));
        }
        if self.challenge_size != self.key_bits / 8 {
            return Err(ChatError::config_error(format!(
                "Challenge size {} does not match a {}-bit key",
                self.challenge_size, self.key_bits
            )));
        }
        if self.outbound_buffer == 0 {
            return Err(ChatError::config_error("Outbound buffer cannot be zero"));
        }
        if self.max_line_length == 0 {
            return Err(ChatError::config_error("Max line length cannot be zero"));
        }
        if self.handshake_timeout_secs == Some(0) {
            return Err(ChatError::config_error("Handshake timeout cannot be zero"));
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Client driver settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root directory for received files (`<dir>/<sender>/<filename>`)
    pub download_dir: PathBuf,
    /// Raw bytes per `/buffer` chunk
    pub chunk_size: usize,
    /// Client key size in bits
    pub key_bits: usize,
    /// Key pair and learned server key, reused across runs
    pub identity_file: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            download_dir: PathBuf::from("received"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            key_bits: DEFAULT_KEY_BITS,
            identity_file: PathBuf::from(DEFAULT_IDENTITY_FILE),
        }
    }
}

impl ClientConfig {
    /// `host:port`
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ChatError::config_error("Host cannot be empty"));
        }
        if self.chunk_size == 0 {
            return Err(ChatError::config_error("Chunk size cannot be zero"));
        }
        if self.identity_file.as_os_str().is_empty() {
            return Err(ChatError::config_error("Identity file cannot be empty"));
        }
        if self.key_bits == 0 || self.key_bits % 8 != 0 {
            return Err(ChatError::config_error(
                "Key size must be a non-zero multiple of 8 bits",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.challenge_size, 128);
        assert_eq!(config.listen_address(), "0.0.0.0:2222");
        assert!(config.handshake_timeout().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_validation() {
        let mut config = ServerConfig::default();
        config.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.challenge_size = 64;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.bind_address = " ".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.handshake_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_client_validation() {
        let config = ClientConfig::default();
        assert_eq!(config.server_address(), "localhost:2222");
        assert!(config.validate().is_ok());

        let mut config = ClientConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.identity_file = PathBuf::new();
        assert!(config.validate().is_err());
    }
}
