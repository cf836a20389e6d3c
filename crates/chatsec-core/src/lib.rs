//! Chatsec Core Protocol Implementation
//!
//! Shared building blocks of the chatsec server and client driver: the line
//! wire format, the crypto-engine boundary used by the challenge-response
//! handshake, the replay guard, the receiving side of file transfers, the
//! error taxonomy and configuration.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod crypto;
pub mod errors;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::{ClientConfig, ServerConfig};
pub use crypto::{CryptoEngine, KeyPair, PrivateKey, PublicKey, DATASIZE};
pub use errors::{
    AuthError, ChatError, CryptoError, ProtocolError, RegistryError, Result,
};
pub use protocol::{
    ClientCommand, CompletedTransfer, FileTransferCoordinator, ReplayGuard, SequenceVerdict,
    ServerMessage, TransferHook,
};
pub use types::{DisplayName, SessionId};

#[cfg(feature = "rsa-engine")]
pub use crypto::RsaEngine;

#[cfg(any(test, feature = "testing"))]
pub use crypto::MaskEngine;
