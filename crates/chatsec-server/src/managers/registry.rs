//! Session registry
//!
//! Bounded table of live connections plus the credential store, both behind a
//! single mutex. Every registration, rename, lookup-for-broadcast, sequence
//! check and removal takes that lock, so they form one total order. The lock
//! is never held across socket I/O: callers get cloned [`SessionHandle`]s and
//! push lines into per-session queues after it is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use chatsec_core::{
    DisplayName, PublicKey, RegistryError, ReplayGuard, SequenceVerdict, ServerMessage, SessionId,
};

use super::credentials::CredentialStore;

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

/// Write side of an accepted connection
#[derive(Debug, Clone)]
pub struct Connection {
    id: SessionId,
    outbound: mpsc::Sender<String>,
    kick: Arc<Notify>,
}

impl Connection {
    pub fn new(id: SessionId, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id,
            outbound,
            kick: Arc::new(Notify::new()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Signal completed when the session is kicked
    pub fn kick_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.kick)
    }
}

/// Cheap, cloneable reference to a registered session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    name: DisplayName,
    connection: Connection,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.connection.id
    }

    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    /// Queue a message for this session
    pub fn send(&self, message: &ServerMessage) -> bool {
        self.send_line(message.to_string())
    }

    /// Queue a raw line; never blocks, drops on a full queue
    pub fn send_line(&self, line: String) -> bool {
        match self.connection.outbound.try_send(line) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(session = %self.id(), name = %self.name, "Outbound queue full, line dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(session = %self.id(), name = %self.name, "Outbound queue closed");
                false
            }
        }
    }

    /// Ask the session's connection task to close
    pub fn kick(&self) {
        self.connection.kick.notify_one();
    }
}

/// What was removed by [`SessionRegistry::unregister`]
#[derive(Debug, Clone)]
pub struct Departure {
    pub handle: SessionHandle,
    pub authenticated: bool,
    /// Authenticated sessions left after the removal
    pub remaining: usize,
}

/// Point-in-time view of one session, for the server console
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: DisplayName,
    pub authenticated: bool,
    pub last_sequence: u64,
    /// Receiver of the transfer between `/file` and `/endoftransfer`
    pub pending_transfer: Option<String>,
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SessionEntry {
    handle: SessionHandle,
    authenticated: bool,
    guard: ReplayGuard,
    pending_transfer: Option<String>,
}

#[derive(Debug)]
struct RegistryState {
    /// Insertion order, kept dense on removal
    sessions: Vec<SessionEntry>,
    credentials: CredentialStore,
}

impl RegistryState {
    fn position(&self, name: &str) -> Option<usize> {
        self.sessions
            .iter()
            .position(|entry| entry.handle.name.as_str() == name)
    }

    fn entry_mut(&mut self, id: SessionId) -> Option<&mut SessionEntry> {
        self.sessions
            .iter_mut()
            .find(|entry| entry.handle.id() == id)
    }

    fn entry(&self, id: SessionId) -> Option<&SessionEntry> {
        self.sessions.iter().find(|entry| entry.handle.id() == id)
    }

    fn authenticated_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.authenticated).count()
    }
}

fn missing(id: SessionId) -> RegistryError {
    RegistryError::SessionNotFound {
        name: id.to_string(),
    }
}

/// Bounded table of active sessions sharing one lock with the credential store
#[derive(Debug)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize, credentials: CredentialStore) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                sessions: Vec::with_capacity(max_sessions),
                credentials,
            }),
            max_sessions,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    // ---- Membership ----

    /// Add a session under `name`
    pub fn register(
        &self,
        name: DisplayName,
        connection: Connection,
    ) -> Result<SessionHandle, RegistryError> {
        let mut state = self.lock();

        if state.sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityExceeded {
                current: state.sessions.len(),
                max: self.max_sessions,
            });
        }
        if state.position(&name).is_some() {
            return Err(RegistryError::NameInUse {
                name: name.to_string(),
            });
        }

        let handle = SessionHandle { name, connection };
        state.sessions.push(SessionEntry {
            handle: handle.clone(),
            authenticated: false,
            guard: ReplayGuard::new(),
            pending_transfer: None,
        });
        debug!(session = %handle.id(), name = %handle.name, "Session registered");
        Ok(handle)
    }

    /// Remove the session called `name`, compacting the table
    pub fn unregister(&self, name: &str) -> Option<Departure> {
        let mut state = self.lock();
        let index = state.position(name)?;
        Self::remove_at(&mut state, index)
    }

    /// Remove session `id` whatever name it currently holds
    pub fn unregister_id(&self, id: SessionId) -> Option<Departure> {
        let mut state = self.lock();
        let index = state
            .sessions
            .iter()
            .position(|entry| entry.handle.id() == id)?;
        Self::remove_at(&mut state, index)
    }

    fn remove_at(state: &mut RegistryState, index: usize) -> Option<Departure> {
        let entry = state.sessions.remove(index);
        let remaining = state.authenticated_count();

        debug!(
            session = %entry.handle.id(),
            name = %entry.handle.name,
            remaining,
            "Session unregistered"
        );
        Some(Departure {
            handle: entry.handle,
            authenticated: entry.authenticated,
            remaining,
        })
    }

    /// Any registered session called `name`
    pub fn lookup(&self, name: &str) -> Option<SessionHandle> {
        let state = self.lock();
        state
            .position(name)
            .map(|index| state.sessions[index].handle.clone())
    }

    /// Authenticated session called `name`
    pub fn lookup_authenticated(&self, name: &str) -> Option<SessionHandle> {
        let state = self.lock();
        state
            .sessions
            .iter()
            .find(|entry| entry.authenticated && entry.handle.name.as_str() == name)
            .map(|entry| entry.handle.clone())
    }

    /// Authenticated sessions in insertion order
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.lock()
            .sessions
            .iter()
            .filter(|entry| entry.authenticated)
            .map(|entry| entry.handle.clone())
            .collect()
    }

    /// Every registered session, authenticated or not, for the console
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.lock()
            .sessions
            .iter()
            .map(|entry| SessionInfo {
                id: entry.handle.id(),
                name: entry.handle.name.clone(),
                authenticated: entry.authenticated,
                last_sequence: entry.guard.last_accepted(),
                pending_transfer: entry.pending_transfer.clone(),
            })
            .collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn authenticated_count(&self) -> usize {
        self.lock().authenticated_count()
    }

    // ---- Naming and authentication ----

    /// Reserve `name` for session `id` and return its stored credential
    pub fn claim_name(
        &self,
        id: SessionId,
        name: DisplayName,
    ) -> Result<Option<PublicKey>, RegistryError> {
        let mut state = self.lock();

        if let Some(index) = state.position(&name) {
            if state.sessions[index].handle.id() != id {
                return Err(RegistryError::NameInUse {
                    name: name.to_string(),
                });
            }
        }

        let credential = state.credentials.get(&name).cloned();
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        entry.handle.name = name;
        Ok(credential)
    }

    /// Give up a claimed name and fall back to the provisional one
    pub fn release_name(&self, id: SessionId) {
        let mut state = self.lock();
        if let Some(entry) = state.entry_mut(id) {
            entry.handle.name = DisplayName::provisional(id);
            entry.authenticated = false;
        }
    }

    /// Remember the public key presented for `name`
    pub fn store_credential(&self, name: &DisplayName, key: PublicKey) {
        if self.lock().credentials.insert(name, key).is_some() {
            warn!(name = %name, "Replaced stored credential");
        }
    }

    pub fn credential(&self, name: &str) -> Option<PublicKey> {
        self.lock().credentials.get(name).cloned()
    }

    /// Mark `id` authenticated; returns the authenticated count including it
    pub fn mark_authenticated(&self, id: SessionId) -> Result<usize, RegistryError> {
        let mut state = self.lock();
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        entry.authenticated = true;
        Ok(state.authenticated_count())
    }

    /// Rename an authenticated session and move its credential along
    pub fn rename(&self, id: SessionId, new_name: DisplayName) -> Result<DisplayName, RegistryError> {
        let mut state = self.lock();

        if state.position(&new_name).is_some() {
            return Err(RegistryError::NameInUse {
                name: new_name.to_string(),
            });
        }
        let old_name = state
            .entry(id)
            .map(|entry| entry.handle.name.clone())
            .ok_or_else(|| missing(id))?;

        state.credentials.rename(&old_name, &new_name)?;
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        entry.handle.name = new_name;
        Ok(old_name)
    }

    // ---- Per-session protocol state ----

    /// Run the replay guard of session `id`
    pub fn check_sequence(&self, id: SessionId, sequence: u64) -> Result<SequenceVerdict, RegistryError> {
        let mut state = self.lock();
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        Ok(entry.guard.check(sequence))
    }

    /// Start a transfer to `target`; returns the receiver of any transfer it replaces
    pub fn begin_transfer(&self, id: SessionId, target: &str) -> Result<Option<String>, RegistryError> {
        let mut state = self.lock();
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        Ok(entry.pending_transfer.replace(target.to_string()))
    }

    /// Clear the pending transfer; returns its receiver
    pub fn end_transfer(&self, id: SessionId) -> Result<Option<String>, RegistryError> {
        let mut state = self.lock();
        let entry = state.entry_mut(id).ok_or_else(|| missing(id))?;
        Ok(entry.pending_transfer.take())
    }

    /// Receiver of the pending transfer of session `id`
    pub fn pending_transfer(&self, id: SessionId) -> Option<String> {
        self.lock()
            .entry(id)
            .and_then(|entry| entry.pending_transfer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsec_core::MaskEngine;

    fn connection(id: u64) -> (Connection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        (Connection::new(SessionId::new(id), tx), rx)
    }

    fn name(s: &str) -> DisplayName {
        DisplayName::new(s).unwrap()
    }

    fn registry(max: usize) -> SessionRegistry {
        SessionRegistry::new(max, CredentialStore::new())
    }

    #[test]
    fn test_capacity_is_enforced() {
        let registry = registry(2);
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);
        let (c, _rc) = connection(3);

        registry.register(name("alice"), a).unwrap();
        registry.register(name("bob"), b).unwrap();
        assert_eq!(
            registry.register(name("carol"), c).unwrap_err(),
            RegistryError::CapacityExceeded { current: 2, max: 2 }
        );
    }

    #[test]
    fn test_names_are_unique() {
        let registry = registry(3);
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);

        registry.register(name("alice"), a).unwrap();
        assert!(matches!(
            registry.register(name("alice"), b),
            Err(RegistryError::NameInUse { .. })
        ));
    }

    #[test]
    fn test_unregister_compacts_and_hides() {
        let registry = registry(3);
        for (id, n) in [(1, "alice"), (2, "bob"), (3, "carol")] {
            let (conn, _rx) = connection(id);
            registry.register(name(n), conn).unwrap();
            registry.mark_authenticated(SessionId::new(id)).unwrap();
        }

        let departed = registry.unregister("bob").unwrap();
        assert!(departed.authenticated);
        assert_eq!(departed.remaining, 2);
        assert!(registry.lookup("bob").is_none());

        let names: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|h| h.name().to_string())
            .collect();
        assert_eq!(names, ["alice", "carol"]);
        assert!(registry.unregister("bob").is_none());
    }

    #[test]
    fn test_claim_and_release_name() {
        let registry = registry(3);
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);
        let first = SessionId::new(1);
        let second = SessionId::new(2);
        registry.register(DisplayName::provisional(first), a).unwrap();
        registry.register(DisplayName::provisional(second), b).unwrap();

        assert_eq!(registry.claim_name(first, name("alice")).unwrap(), None);
        assert!(matches!(
            registry.claim_name(second, name("alice")),
            Err(RegistryError::NameInUse { .. })
        ));

        registry.release_name(first);
        assert!(registry.lookup("alice").is_none());
        assert!(registry.lookup("#1").is_some());
        assert_eq!(registry.claim_name(second, name("alice")).unwrap(), None);
    }

    #[test]
    fn test_credentials_survive_sessions() {
        let registry = registry(3);
        let key = MaskEngine::keypair_from_seed(4).public;
        let (a, _ra) = connection(1);
        let id = SessionId::new(1);

        registry.register(DisplayName::provisional(id), a).unwrap();
        registry.claim_name(id, name("alice")).unwrap();
        registry.store_credential(&name("alice"), key.clone());
        registry.unregister("alice").unwrap();

        let (b, _rb) = connection(2);
        let id = SessionId::new(2);
        registry.register(DisplayName::provisional(id), b).unwrap();
        assert_eq!(registry.claim_name(id, name("alice")).unwrap(), Some(key));
    }

    #[test]
    fn test_snapshot_only_lists_authenticated() {
        let registry = registry(3);
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);
        registry.register(name("alice"), a).unwrap();
        registry.register(DisplayName::provisional(SessionId::new(2)), b).unwrap();

        assert!(registry.snapshot().is_empty());
        assert_eq!(registry.mark_authenticated(SessionId::new(1)).unwrap(), 1);
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.authenticated_count(), 1);
    }

    #[test]
    fn test_rename_moves_credential() {
        let registry = registry(3);
        let key = MaskEngine::keypair_from_seed(5).public;
        let (a, _ra) = connection(1);
        let (b, _rb) = connection(2);
        let id = SessionId::new(1);
        registry.register(name("alice"), a).unwrap();
        registry.register(name("bob"), b).unwrap();
        registry.store_credential(&name("alice"), key.clone());

        assert!(matches!(
            registry.rename(id, name("bob")),
            Err(RegistryError::NameInUse { .. })
        ));
        assert_eq!(registry.rename(id, name("alicia")).unwrap(), "alice");
        assert_eq!(registry.credential("alicia"), Some(key));
        assert!(registry.credential("alice").is_none());
        assert!(registry.lookup("alicia").is_some());
    }

    #[test]
    fn test_sequence_and_transfer_flags() {
        let registry = registry(1);
        let (a, _ra) = connection(1);
        let id = SessionId::new(1);
        registry.register(name("alice"), a).unwrap();

        assert_eq!(registry.check_sequence(id, 1).unwrap(), SequenceVerdict::InOrder);
        assert!(!registry.check_sequence(id, 1).unwrap().is_accepted());

        assert_eq!(registry.pending_transfer(id), None);
        assert_eq!(registry.begin_transfer(id, "bob").unwrap(), None);
        assert_eq!(registry.pending_transfer(id).as_deref(), Some("bob"));
        assert_eq!(registry.begin_transfer(id, "carol").unwrap().as_deref(), Some("bob"));
        assert_eq!(registry.end_transfer(id).unwrap().as_deref(), Some("carol"));
        assert_eq!(registry.pending_transfer(id), None);
        assert_eq!(registry.end_transfer(id).unwrap(), None);

        assert!(registry.check_sequence(SessionId::new(9), 1).is_err());
    }

    #[tokio::test]
    async fn test_handle_delivery_and_kick() {
        let registry = registry(1);
        let (a, mut rx) = connection(1);
        let kicked = a.kick_signal();
        let handle = registry.register(name("alice"), a).unwrap();

        assert!(handle.send(&ServerMessage::Hello {
            name: "alice".to_string()
        }));
        assert_eq!(rx.recv().await.unwrap(), "[SERVER] Hello alice!");

        handle.kick();
        kicked.notified().await;
    }
}
