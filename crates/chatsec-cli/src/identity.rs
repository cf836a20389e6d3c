//! Client identity and its on-disk form
//!
//! The server remembers a name's public key for as long as it runs, so the
//! key pair has to outlive the client process. It is kept in a small TOML
//! file together with the server key learned on first contact.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chatsec_core::protocol::wire::{decode_b64, encode_b64};
use chatsec_core::{CryptoEngine, KeyPair, PrivateKey, PublicKey};

use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// Identity
// ----------------------------------------------------------------------------

/// Local key pair plus the server key learned on first contact.
///
/// Kept across connections: a returning user is challenged without being
/// sent the server key again.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    keys: KeyPair,
    server_key: Option<PublicKey>,
}

impl ClientIdentity {
    pub fn new(keys: KeyPair) -> Self {
        Self {
            keys,
            server_key: None,
        }
    }

    /// Fresh key pair from `engine`
    pub fn generate(engine: &dyn CryptoEngine) -> Result<Self> {
        Ok(Self::new(engine.generate_keypair()?))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.keys.public
    }

    pub fn server_key(&self) -> Option<&PublicKey> {
        self.server_key.as_ref()
    }

    pub fn remember_server_key(&mut self, key: PublicKey) {
        self.server_key = Some(key);
    }

    /// Response to a challenge: decrypt with our key, encrypt for the server
    pub(crate) fn answer(&self, engine: &dyn CryptoEngine, challenge: &[u8]) -> Result<String> {
        let server_key = self.server_key.as_ref().ok_or(CliError::UnknownServerKey)?;
        let plain = engine.decrypt(&self.keys.private, challenge)?;
        let response = engine.encrypt(server_key, &plain)?;
        Ok(encode_b64(&response))
    }

    // ---- Persistence ----

    /// Load the identity stored at `path`
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CliError::IdentityPersistence(format!(
                "Failed to read identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        let stored: StoredIdentity = toml::from_str(&text).map_err(|e| {
            CliError::IdentityPersistence(format!(
                "Failed to parse identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        stored.into_identity()
    }

    /// Write the identity to `path`, creating parent directories
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(&StoredIdentity::from_identity(self))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CliError::IdentityPersistence(format!(
                    "Failed to create {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        std::fs::write(path, text).map_err(|e| {
            CliError::IdentityPersistence(format!(
                "Failed to write identity file {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!(path = %path.display(), "Identity saved");
        Ok(())
    }

    /// Reuse the identity at `path`, or generate and save a new one
    pub fn load_or_generate(path: &Path, engine: &dyn CryptoEngine) -> Result<Self> {
        if path.exists() {
            let identity = Self::load_from_file(path)?;
            info!(
                path = %path.display(),
                fingerprint = %identity.public_key().fingerprint(),
                "Loaded identity"
            );
            return Ok(identity);
        }

        let identity = Self::generate(engine)?;
        identity.save_to_file(path)?;
        info!(
            path = %path.display(),
            fingerprint = %identity.public_key().fingerprint(),
            "Generated new identity"
        );
        Ok(identity)
    }
}

// ----------------------------------------------------------------------------
// File Format
// ----------------------------------------------------------------------------

/// Identity file contents; keys use the same base64 encoding as the wire
#[derive(Debug, Serialize, Deserialize)]
struct StoredIdentity {
    public_key: String,
    private_modulus: String,
    private_exponent: String,
    server_key: Option<String>,
}

impl StoredIdentity {
    fn from_identity(identity: &ClientIdentity) -> Self {
        Self {
            public_key: identity.keys.public.to_wire(),
            private_modulus: encode_b64(identity.keys.private.modulus()),
            private_exponent: encode_b64(identity.keys.private.exponent()),
            server_key: identity.server_key.as_ref().map(PublicKey::to_wire),
        }
    }

    fn into_identity(self) -> Result<ClientIdentity> {
        let corrupt = |what: &str| CliError::IdentityPersistence(format!("Corrupt {} in identity file", what));

        let public = PublicKey::from_wire(&self.public_key).map_err(|_| corrupt("public key"))?;
        let modulus = decode_b64(&self.private_modulus).map_err(|_| corrupt("private modulus"))?;
        let exponent = decode_b64(&self.private_exponent).map_err(|_| corrupt("private exponent"))?;
        let server_key = self
            .server_key
            .as_deref()
            .map(PublicKey::from_wire)
            .transpose()
            .map_err(|_| corrupt("server key"))?;

        Ok(ClientIdentity {
            keys: KeyPair {
                public,
                private: PrivateKey::new(modulus, exponent),
            },
            server_key,
        })
    }
}
