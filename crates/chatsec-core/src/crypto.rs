//! Crypto engine boundary
//!
//! The chat core never performs public-key arithmetic itself. It hands fixed
//! size blocks to a [`CryptoEngine`] and gets fixed size blocks back. The key
//! material is opaque: a modulus and an exponent as big-endian byte strings,
//! which is exactly what travels in `AUTH_PUBKEY` lines.
//!
//! Which engine is compiled in is decided by cargo features, not at runtime:
//! `rsa-engine` provides [`RsaEngine`] (textbook RSA, no padding) and
//! `testing` provides the deterministic [`MaskEngine`].

use core::fmt;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{CryptoError, ProtocolError};
use crate::protocol::wire::{decode_b64, encode_b64};

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Block size handled by the engines (1024-bit modulus, no padding)
pub const DATASIZE: usize = 128;

/// Default RSA modulus size in bits
pub const DEFAULT_KEY_BITS: usize = DATASIZE * 8;

// ----------------------------------------------------------------------------
// Key Material
// ----------------------------------------------------------------------------

/// Public key material: modulus and public exponent, big-endian
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl PublicKey {
    pub fn new(modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self { modulus, exponent }
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }

    /// Encode as `<base64 modulus> <base64 exponent>`
    pub fn to_wire(&self) -> String {
        format!("{} {}", encode_b64(&self.modulus), encode_b64(&self.exponent))
    }

    /// Parse the `<base64 modulus> <base64 exponent>` form
    pub fn from_wire(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.split_whitespace();
        let (Some(modulus), Some(exponent), None) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(ProtocolError::InvalidPublicKey);
        };

        let modulus = decode_b64(modulus).map_err(|_| ProtocolError::InvalidPublicKey)?;
        let exponent = decode_b64(exponent).map_err(|_| ProtocolError::InvalidPublicKey)?;
        if modulus.is_empty() || exponent.is_empty() {
            return Err(ProtocolError::InvalidPublicKey);
        }

        Ok(Self { modulus, exponent })
    }

    /// Short SHA-256 fingerprint used in logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.modulus);
        hasher.update(&self.exponent);
        hex::encode(&hasher.finalize()[..8])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Private key material: modulus and private exponent, big-endian
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl PrivateKey {
    pub fn new(modulus: Vec<u8>, exponent: Vec<u8>) -> Self {
        Self { modulus, exponent }
    }

    pub fn modulus(&self) -> &[u8] {
        &self.modulus
    }

    pub fn exponent(&self) -> &[u8] {
        &self.exponent
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A matching public/private key pair
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

// ----------------------------------------------------------------------------
// Engine Boundary
// ----------------------------------------------------------------------------

/// Fixed-block public-key engine consumed by the authentication handshake
pub trait CryptoEngine: Send + Sync {
    /// Size of every plaintext and ciphertext block
    fn block_size(&self) -> usize {
        DATASIZE
    }

    /// Generate a fresh key pair
    fn generate_keypair(&self) -> Result<KeyPair, CryptoError>;

    /// Encrypt exactly one block under a public key
    fn encrypt(&self, key: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt exactly one block with a private key
    fn decrypt(&self, key: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Random block suitable as a challenge for this engine
    fn random_block(&self) -> Result<Vec<u8>, CryptoError> {
        let mut block = vec![0u8; self.block_size()];
        OsRng
            .try_fill_bytes(&mut block)
            .map_err(|_| CryptoError::RandomGenerationFailed)?;
        Ok(block)
    }
}

/// Reject inputs that are not exactly one block
pub fn check_block(input: &[u8], expected: usize) -> Result<(), CryptoError> {
    if input.len() != expected {
        return Err(CryptoError::BlockSize {
            expected,
            actual: input.len(),
        });
    }
    Ok(())
}

/// Left-pad a big-endian integer to a full block
fn pad_block(mut bytes: Vec<u8>, size: usize) -> Vec<u8> {
    if bytes.len() < size {
        let mut padded = vec![0u8; size - bytes.len()];
        padded.append(&mut bytes);
        padded
    } else {
        bytes
    }
}

// ----------------------------------------------------------------------------
// RSA Engine (no padding)
// ----------------------------------------------------------------------------

#[cfg(feature = "rsa-engine")]
pub use self::rsa_engine::RsaEngine;

#[cfg(feature = "rsa-engine")]
mod rsa_engine {
    use rand_core::OsRng;
    use rsa::traits::{PrivateKeyParts, PublicKeyParts};
    use rsa::{BigUint, RsaPrivateKey};

    use super::{check_block, pad_block, CryptoEngine, KeyPair, PrivateKey, PublicKey};
    use crate::errors::CryptoError;

    /// Textbook RSA over a single block, matching `RSA/NONE/NoPadding`
    #[derive(Debug, Clone)]
    pub struct RsaEngine {
        key_bits: usize,
    }

    impl RsaEngine {
        pub fn new(key_bits: usize) -> Self {
            Self { key_bits }
        }

        fn apply(
            &self,
            modulus: &[u8],
            exponent: &[u8],
            input: &[u8],
        ) -> Result<Vec<u8>, String> {
            let n = BigUint::from_bytes_be(modulus);
            let e = BigUint::from_bytes_be(exponent);
            let m = BigUint::from_bytes_be(input);

            if n.bits() != self.key_bits {
                return Err(format!(
                    "modulus has {} bits, engine expects {}",
                    n.bits(),
                    self.key_bits
                ));
            }
            if m >= n {
                return Err("block is not smaller than the modulus".to_string());
            }

            Ok(pad_block(m.modpow(&e, &n).to_bytes_be(), self.block_size()))
        }
    }

    impl Default for RsaEngine {
        fn default() -> Self {
            Self::new(super::DEFAULT_KEY_BITS)
        }
    }

    impl CryptoEngine for RsaEngine {
        fn block_size(&self) -> usize {
            self.key_bits / 8
        }

        fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
            let private = RsaPrivateKey::new(&mut OsRng, self.key_bits).map_err(|e| {
                CryptoError::KeyGenerationFailed {
                    reason: e.to_string(),
                }
            })?;

            let modulus = private.n().to_bytes_be();
            Ok(KeyPair {
                public: PublicKey::new(modulus.clone(), private.e().to_bytes_be()),
                private: PrivateKey::new(modulus, private.d().to_bytes_be()),
            })
        }

        fn encrypt(&self, key: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            check_block(plaintext, self.block_size())?;
            self.apply(key.modulus(), key.exponent(), plaintext)
                .map_err(|reason| CryptoError::EncryptionFailed { reason })
        }

        fn decrypt(&self, key: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            check_block(ciphertext, self.block_size())?;
            self.apply(key.modulus(), key.exponent(), ciphertext)
                .map_err(|reason| CryptoError::DecryptionFailed { reason })
        }

        fn random_block(&self) -> Result<Vec<u8>, CryptoError> {
            let mut block = vec![0u8; self.block_size()];
            rand_core::RngCore::try_fill_bytes(&mut OsRng, &mut block)
                .map_err(|_| CryptoError::RandomGenerationFailed)?;
            // Top bit cleared so the block is always below a full-size modulus
            block[0] &= 0x7f;
            Ok(block)
        }
    }
}

// ----------------------------------------------------------------------------
// Mask Engine (deterministic, for tests)
// ----------------------------------------------------------------------------

#[cfg(any(test, feature = "testing"))]
pub use self::mask_engine::MaskEngine;

#[cfg(any(test, feature = "testing"))]
mod mask_engine {
    use rand_core::{OsRng, RngCore};

    use super::{check_block, CryptoEngine, KeyPair, PrivateKey, PublicKey, DATASIZE};
    use crate::errors::CryptoError;

    /// XOR-mask engine: a key pair shares one random mask, so only the
    /// matching private key inverts an encryption.
    #[derive(Debug, Clone, Default)]
    pub struct MaskEngine;

    impl MaskEngine {
        /// Key pair derived from a seed byte, for reproducible fixtures
        pub fn keypair_from_seed(seed: u8) -> KeyPair {
            let mask: Vec<u8> = (0..DATASIZE)
                .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
                .collect();
            Self::keypair_from_mask(mask)
        }

        fn keypair_from_mask(mask: Vec<u8>) -> KeyPair {
            KeyPair {
                public: PublicKey::new(mask.clone(), vec![1]),
                private: PrivateKey::new(mask, vec![1]),
            }
        }

        fn xor(mask: &[u8], input: &[u8]) -> Result<Vec<u8>, CryptoError> {
            check_block(input, DATASIZE)?;
            if mask.len() != DATASIZE {
                return Err(CryptoError::InvalidKey {
                    reason: format!("mask must be {} bytes", DATASIZE),
                });
            }
            Ok(input.iter().zip(mask).map(|(a, b)| a ^ b).collect())
        }
    }

    impl CryptoEngine for MaskEngine {
        fn generate_keypair(&self) -> Result<KeyPair, CryptoError> {
            let mut mask = vec![0u8; DATASIZE];
            OsRng
                .try_fill_bytes(&mut mask)
                .map_err(|_| CryptoError::RandomGenerationFailed)?;
            Ok(Self::keypair_from_mask(mask))
        }

        fn encrypt(&self, key: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Self::xor(key.modulus(), plaintext)
        }

        fn decrypt(&self, key: &PrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Self::xor(key.modulus(), ciphertext)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_wire_format() {
        let key = PublicKey::new(vec![0xC0, 0xFF, 0xEE], vec![1, 0, 1]);
        let line = key.to_wire();
        assert_eq!(line, "wP/u AQAB");
        assert_eq!(PublicKey::from_wire(&line).unwrap(), key);

        assert!(PublicKey::from_wire("onlyone").is_err());
        assert!(PublicKey::from_wire("a b c").is_err());
        assert!(PublicKey::from_wire("!!! AQAB").is_err());
    }

    #[test]
    fn test_mask_engine_round_trip() {
        let engine = MaskEngine;
        let pair = engine.generate_keypair().unwrap();
        let block = engine.random_block().unwrap();

        let cipher = engine.encrypt(&pair.public, &block).unwrap();
        assert_ne!(cipher, block);
        assert_eq!(engine.decrypt(&pair.private, &cipher).unwrap(), block);
    }

    #[test]
    fn test_mask_engine_mismatched_key() {
        let engine = MaskEngine;
        let alice = MaskEngine::keypair_from_seed(1);
        let mallory = MaskEngine::keypair_from_seed(2);
        let block = engine.random_block().unwrap();

        let cipher = engine.encrypt(&alice.public, &block).unwrap();
        assert_ne!(engine.decrypt(&mallory.private, &cipher).unwrap(), block);
    }

    #[test]
    fn test_block_size_enforced() {
        let engine = MaskEngine;
        let pair = MaskEngine::keypair_from_seed(3);
        let err = engine.encrypt(&pair.public, &[0u8; 16]).unwrap_err();
        assert_eq!(
            err,
            CryptoError::BlockSize {
                expected: DATASIZE,
                actual: 16
            }
        );
        assert!(engine.decrypt(&pair.private, &[0u8; DATASIZE + 1]).is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let pair = MaskEngine::keypair_from_seed(9);
        assert_eq!(pair.public.fingerprint(), pair.public.clone().fingerprint());
        assert_eq!(pair.public.fingerprint().len(), 16);
    }

    #[cfg(feature = "rsa-engine")]
    #[test]
    fn test_rsa_engine_round_trip() {
        let engine = RsaEngine::default();
        let pair = engine.generate_keypair().unwrap();
        assert_eq!(pair.public.modulus().len(), DATASIZE);

        let challenge = engine.random_block().unwrap();
        let cipher = engine.encrypt(&pair.public, &challenge).unwrap();
        assert_eq!(cipher.len(), DATASIZE);
        assert_eq!(engine.decrypt(&pair.private, &cipher).unwrap(), challenge);

        assert!(matches!(
            engine.encrypt(&pair.public, &challenge[..64]),
            Err(CryptoError::BlockSize { .. })
        ));
    }
}
