//! Authentication state machine
//!
//! One machine per connection, owned by the connection task. It consumes the
//! bare lines a client sends before it is authenticated:
//!
//! ```text
//! Unnamed --name--> [NAME_SET] --no credential--> PubkeyExchange --key--> ChallengeSent
//!                              \--credential---------------------------/       |
//!                                                                    response  v
//!                                                                      Authenticated
//! ```
//!
//! Any verification failure releases the name and returns to `Unnamed`. A
//! new random challenge is drawn every time one is sent.

use std::sync::Arc;

use tracing::{debug, info, warn};

use chatsec_core::protocol::wire::decode_b64;
use chatsec_core::{
    AuthError, CryptoEngine, DisplayName, KeyPair, PublicKey, RegistryError, ServerMessage,
    SessionId,
};

use crate::managers::SessionRegistry;

// ----------------------------------------------------------------------------
// States
// ----------------------------------------------------------------------------

/// Handshake progress of one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Waiting for a display name
    Unnamed,
    /// Server key sent, waiting for the client key
    PubkeyExchange { name: DisplayName },
    /// Challenge sent, waiting for the response
    ChallengeSent {
        name: DisplayName,
        challenge: Vec<u8>,
    },
    Authenticated { name: DisplayName },
}

impl AuthState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated { .. })
    }

    /// Name claimed so far, if any
    pub fn name(&self) -> Option<&DisplayName> {
        match self {
            AuthState::Unnamed => None,
            AuthState::PubkeyExchange { name }
            | AuthState::ChallengeSent { name, .. }
            | AuthState::Authenticated { name } => Some(name),
        }
    }
}

/// How a line moved the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Still in progress
    Pending,
    /// Name refused, still `Unnamed`
    Rejected,
    /// Verification failed, back to `Unnamed`
    Failed(AuthError),
    /// Handshake complete
    Authenticated {
        name: DisplayName,
        /// Authenticated sessions including this one
        count: usize,
    },
}

/// Replies to send plus the outcome of one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthStep {
    pub replies: Vec<ServerMessage>,
    pub outcome: AuthOutcome,
}

impl AuthStep {
    fn pending(replies: Vec<ServerMessage>) -> Self {
        Self {
            replies,
            outcome: AuthOutcome::Pending,
        }
    }

    fn rejected(reply: ServerMessage) -> Self {
        Self {
            replies: vec![reply, ServerMessage::Prompt],
            outcome: AuthOutcome::Rejected,
        }
    }
}

// ----------------------------------------------------------------------------
// State Machine
// ----------------------------------------------------------------------------

/// Per-connection challenge-response handshake
pub struct AuthStateMachine {
    session: SessionId,
    state: AuthState,
    engine: Arc<dyn CryptoEngine>,
    server_keys: Arc<KeyPair>,
    registry: Arc<SessionRegistry>,
}

impl AuthStateMachine {
    pub fn new(
        session: SessionId,
        engine: Arc<dyn CryptoEngine>,
        server_keys: Arc<KeyPair>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            session,
            state: AuthState::Unnamed,
            engine,
            server_keys,
            registry,
        }
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.is_authenticated()
    }

    /// Feed one pre-authentication line
    pub fn handle_line(&mut self, line: &str) -> AuthStep {
        let line = line.trim();
        match std::mem::replace(&mut self.state, AuthState::Unnamed) {
            AuthState::Unnamed => self.on_name(line),
            AuthState::PubkeyExchange { name } => self.on_client_key(name, line),
            AuthState::ChallengeSent { name, challenge } => self.on_response(name, challenge, line),
            AuthState::Authenticated { name } => {
                warn!(session = %self.session, name = %name, "Handshake line after authentication");
                self.state = AuthState::Authenticated { name };
                AuthStep::pending(Vec::new())
            }
        }
    }

    fn on_name(&mut self, line: &str) -> AuthStep {
        if line.is_empty() {
            return AuthStep::pending(vec![ServerMessage::Prompt]);
        }

        let name = match DisplayName::new(line) {
            Ok(name) => name,
            Err(_) => {
                return AuthStep::rejected(ServerMessage::InvalidName {
                    name: line.to_string(),
                })
            }
        };

        match self.registry.claim_name(self.session, name.clone()) {
            Ok(None) => {
                debug!(session = %self.session, name = %name, "No stored key, offering server key");
                self.state = AuthState::PubkeyExchange { name };
                AuthStep::pending(vec![ServerMessage::AuthPubkey(
                    self.server_keys.public.clone(),
                )])
            }
            Ok(Some(key)) => {
                debug!(session = %self.session, name = %name, "Known key, sending challenge");
                self.issue_challenge(name, &key)
            }
            Err(RegistryError::NameInUse { name }) => {
                info!(session = %self.session, name = %name, "Name already connected");
                AuthStep::rejected(ServerMessage::NameInUse { name })
            }
            Err(e) => {
                warn!(session = %self.session, error = %e, "Failed to reserve name");
                AuthStep::rejected(ServerMessage::Error {
                    text: e.to_string(),
                })
            }
        }
    }

    fn on_client_key(&mut self, name: DisplayName, line: &str) -> AuthStep {
        match PublicKey::from_wire(line) {
            Ok(key) => {
                info!(
                    session = %self.session,
                    name = %name,
                    fingerprint = %key.fingerprint(),
                    "Stored client public key"
                );
                self.registry.store_credential(&name, key.clone());
                self.issue_challenge(name, &key)
            }
            Err(e) => {
                let name_str = name.to_string();
                self.fail(
                    name,
                    AuthError::Engine {
                        name: name_str,
                        source: chatsec_core::CryptoError::InvalidKey {
                            reason: e.to_string(),
                        },
                    },
                )
            }
        }
    }

    fn issue_challenge(&mut self, name: DisplayName, key: &PublicKey) -> AuthStep {
        let challenge = match self.engine.random_block() {
            Ok(challenge) => challenge,
            Err(source) => {
                let name_str = name.to_string();
                return self.fail(name, AuthError::Engine { name: name_str, source });
            }
        };

        match self.engine.encrypt(key, &challenge) {
            Ok(ciphertext) => {
                self.state = AuthState::ChallengeSent { name, challenge };
                AuthStep::pending(vec![ServerMessage::AuthChallenge(ciphertext)])
            }
            Err(source) => {
                let name_str = name.to_string();
                self.fail(name, AuthError::Engine { name: name_str, source })
            }
        }
    }

    fn on_response(&mut self, name: DisplayName, challenge: Vec<u8>, line: &str) -> AuthStep {
        let name_str = name.to_string();

        let response = match decode_b64(line) {
            Ok(response) => response,
            Err(_) => return self.fail(name, AuthError::ChallengeMismatch { name: name_str }),
        };

        let decrypted = match self.engine.decrypt(&self.server_keys.private, &response) {
            Ok(decrypted) => decrypted,
            Err(source) => return self.fail(name, AuthError::Engine { name: name_str, source }),
        };

        if decrypted != challenge {
            return self.fail(name, AuthError::ChallengeMismatch { name: name_str });
        }

        match self.registry.mark_authenticated(self.session) {
            Ok(count) => {
                info!(session = %self.session, name = %name, users = count, "Session authenticated");
                self.state = AuthState::Authenticated { name: name.clone() };
                AuthStep {
                    replies: vec![ServerMessage::Hello {
                        name: name_str,
                    }],
                    outcome: AuthOutcome::Authenticated { name, count },
                }
            }
            Err(e) => {
                warn!(session = %self.session, error = %e, "Session vanished during handshake");
                self.fail(name, AuthError::ChallengeMismatch { name: name_str })
            }
        }
    }

    fn fail(&mut self, name: DisplayName, error: AuthError) -> AuthStep {
        warn!(session = %self.session, name = %name, error = %error, "Authentication failed");
        self.registry.release_name(self.session);
        self.state = AuthState::Unnamed;
        AuthStep {
            replies: vec![ServerMessage::AuthFailed, ServerMessage::Prompt],
            outcome: AuthOutcome::Failed(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::{Connection, CredentialStore};
    use chatsec_core::protocol::wire::encode_b64;
    use chatsec_core::MaskEngine;
    use tokio::sync::mpsc;

    struct Fixture {
        machine: AuthStateMachine,
        registry: Arc<SessionRegistry>,
        server_keys: Arc<KeyPair>,
        _rx: mpsc::Receiver<String>,
    }

    fn fixture(id: u64) -> Fixture {
        let registry = Arc::new(SessionRegistry::new(3, CredentialStore::new()));
        fixture_with(registry, id)
    }

    fn fixture_with(registry: Arc<SessionRegistry>, id: u64) -> Fixture {
        let session = SessionId::new(id);
        let (tx, rx) = mpsc::channel(8);
        registry
            .register(DisplayName::provisional(session), Connection::new(session, tx))
            .unwrap();
        let server_keys = Arc::new(MaskEngine::keypair_from_seed(100));
        let machine = AuthStateMachine::new(
            session,
            Arc::new(MaskEngine),
            Arc::clone(&server_keys),
            Arc::clone(&registry),
        );
        Fixture {
            machine,
            registry,
            server_keys,
            _rx: rx,
        }
    }

    /// Client side of the challenge: decrypt with own key, re-encrypt for the server
    fn answer(challenge: &[u8], client: &KeyPair, server: &PublicKey) -> String {
        let engine = MaskEngine;
        let plain = engine.decrypt(&client.private, challenge).unwrap();
        encode_b64(&engine.encrypt(server, &plain).unwrap())
    }

    fn challenge_of(step: &AuthStep) -> Vec<u8> {
        match &step.replies[..] {
            [ServerMessage::AuthChallenge(c)] => c.clone(),
            other => panic!("expected a challenge, got {:?}", other),
        }
    }

    #[test]
    fn test_first_time_round_trip() {
        let mut f = fixture(1);
        let client = MaskEngine::keypair_from_seed(1);

        let step = f.machine.handle_line("alice");
        assert_eq!(
            step.replies,
            vec![ServerMessage::AuthPubkey(f.server_keys.public.clone())]
        );

        let step = f.machine.handle_line(&client.public.to_wire());
        let challenge = challenge_of(&step);
        assert_eq!(f.registry.credential("alice"), Some(client.public.clone()));

        let step = f
            .machine
            .handle_line(&answer(&challenge, &client, &f.server_keys.public));
        assert_eq!(
            step.replies,
            vec![ServerMessage::Hello {
                name: "alice".to_string()
            }]
        );
        assert!(matches!(
            step.outcome,
            AuthOutcome::Authenticated { count: 1, .. }
        ));
        assert!(f.machine.is_authenticated());
        assert_eq!(f.registry.snapshot().len(), 1);
    }

    #[test]
    fn test_known_key_skips_exchange() {
        let mut f = fixture(1);
        let client = MaskEngine::keypair_from_seed(1);
        f.registry
            .store_credential(&DisplayName::new("alice").unwrap(), client.public.clone());

        let step = f.machine.handle_line("alice");
        let challenge = challenge_of(&step);
        let step = f
            .machine
            .handle_line(&answer(&challenge, &client, &f.server_keys.public));
        assert!(matches!(step.outcome, AuthOutcome::Authenticated { .. }));
    }

    #[test]
    fn test_mismatched_key_resets_to_unnamed() {
        let mut f = fixture(1);
        let client = MaskEngine::keypair_from_seed(1);
        let impostor = MaskEngine::keypair_from_seed(2);

        f.machine.handle_line("alice");
        let step = f.machine.handle_line(&client.public.to_wire());
        let challenge = challenge_of(&step);

        let step = f
            .machine
            .handle_line(&answer(&challenge, &impostor, &f.server_keys.public));
        assert_eq!(
            step.replies,
            vec![ServerMessage::AuthFailed, ServerMessage::Prompt]
        );
        assert!(matches!(
            step.outcome,
            AuthOutcome::Failed(AuthError::ChallengeMismatch { .. })
        ));
        assert_eq!(f.machine.state(), &AuthState::Unnamed);
        assert!(f.registry.lookup("alice").is_none());
        assert!(f.registry.snapshot().is_empty());
    }

    #[test]
    fn test_retry_gets_fresh_challenge() {
        let mut f = fixture(1);
        let client = MaskEngine::keypair_from_seed(1);
        f.registry
            .store_credential(&DisplayName::new("alice").unwrap(), client.public.clone());

        let first = challenge_of(&f.machine.handle_line("alice"));
        f.machine.handle_line("bm90IGl0");
        let second = challenge_of(&f.machine.handle_line("alice"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_empty_and_invalid_names() {
        let mut f = fixture(1);
        assert_eq!(
            f.machine.handle_line("   ").replies,
            vec![ServerMessage::Prompt]
        );

        let step = f.machine.handle_line("/quit");
        assert_eq!(step.outcome, AuthOutcome::Rejected);
        assert_eq!(f.machine.state(), &AuthState::Unnamed);
    }

    #[test]
    fn test_active_name_rejected() {
        let registry = Arc::new(SessionRegistry::new(3, CredentialStore::new()));
        let mut first = fixture_with(Arc::clone(&registry), 1);
        let mut second = fixture_with(Arc::clone(&registry), 2);

        first.machine.handle_line("alice");
        let step = second.machine.handle_line("alice");
        assert_eq!(
            step.replies,
            vec![
                ServerMessage::NameInUse {
                    name: "alice".to_string()
                },
                ServerMessage::Prompt
            ]
        );
        assert_eq!(second.machine.state(), &AuthState::Unnamed);
    }

    #[test]
    fn test_malformed_client_key_fails() {
        let mut f = fixture(1);
        f.machine.handle_line("alice");
        let step = f.machine.handle_line("not a key at-all");
        assert!(matches!(step.outcome, AuthOutcome::Failed(_)));
        assert!(f.registry.credential("alice").is_none());
    }
}
