//! Credential store
//!
//! Public keys learned during the handshake, keyed by display name. Entries
//! live for the whole process and outlive the sessions that created them, so
//! a reconnecting user goes straight to the challenge.

use std::collections::HashMap;

use chatsec_core::{PublicKey, RegistryError};

/// Memory-resident map from display name to public key
#[derive(Debug, Default)]
pub struct CredentialStore {
    keys: HashMap<String, PublicKey>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored key for `name`
    pub fn get(&self, name: &str) -> Option<&PublicKey> {
        self.keys.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(name)
    }

    /// Store or replace the key for `name`
    pub fn insert(&mut self, name: &str, key: PublicKey) -> Option<PublicKey> {
        self.keys.insert(name.to_string(), key)
    }

    pub fn remove(&mut self, name: &str) -> Option<PublicKey> {
        self.keys.remove(name)
    }

    /// Move the credential of `from` to `to`.
    ///
    /// Refused when `to` already owns a credential. Moving a name that has
    /// no credential is a no-op.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<(), RegistryError> {
        if self.keys.contains_key(to) {
            return Err(RegistryError::CredentialInUse {
                name: to.to_string(),
            });
        }
        if let Some(key) = self.keys.remove(from) {
            self.keys.insert(to.to_string(), key);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::new(vec![byte; 4], vec![1, 0, 1])
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = CredentialStore::new();
        assert!(store.is_empty());
        assert!(store.insert("alice", key(1)).is_none());
        assert_eq!(store.get("alice"), Some(&key(1)));
        assert!(store.get("bob").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_rename_moves_credential() {
        let mut store = CredentialStore::new();
        store.insert("alice", key(1));
        store.insert("bob", key(2));

        store.rename("alice", "alicia").unwrap();
        assert!(!store.contains("alice"));
        assert_eq!(store.get("alicia"), Some(&key(1)));

        assert_eq!(
            store.rename("alicia", "bob"),
            Err(RegistryError::CredentialInUse {
                name: "bob".to_string()
            })
        );
        assert_eq!(store.get("alicia"), Some(&key(1)));
    }
}
