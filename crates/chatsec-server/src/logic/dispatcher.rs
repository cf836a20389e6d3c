//! Command dispatcher
//!
//! Handles every line of an authenticated session: sequence check first, then
//! the slash command, private message or chat broadcast it carries. Errors are
//! reported to the sender and never end the connection; only `/quit` does.

use tracing::{debug, info, trace, warn};

use chatsec_core::protocol::wire::{decode_b64, split_sequence};
use chatsec_core::{
    ClientCommand, DisplayName, ProtocolError, RegistryError, SequenceVerdict, ServerMessage,
};

use super::router::MessageRouter;
use crate::managers::SessionHandle;

/// What the connection should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Per-connection view of the authenticated session
#[derive(Debug, Clone)]
pub struct SessionContext {
    handle: SessionHandle,
    name: DisplayName,
}

impl SessionContext {
    pub fn new(handle: SessionHandle, name: DisplayName) -> Self {
        Self { handle, name }
    }

    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Queue a reply to this session
    pub fn reply(&self, message: &ServerMessage) {
        self.handle.send(message);
    }
}

/// Who receives the loss warning of a gapped sequence
enum WarningScope<'a> {
    Sender,
    Everyone,
    SenderAnd(&'a str),
}

/// Interprets sequenced lines from authenticated sessions
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    router: MessageRouter,
}

impl CommandDispatcher {
    pub fn new(router: MessageRouter) -> Self {
        Self { router }
    }

    /// Handle one `<seq> <body>` line
    pub fn dispatch(&self, session: &mut SessionContext, line: &str) -> Flow {
        let (sequence, body) = match split_sequence(line) {
            Ok(parts) => parts,
            Err(e) => {
                self.protocol_error(session, e);
                return Flow::Continue;
            }
        };

        let verdict = match self
            .router
            .registry()
            .check_sequence(session.handle.id(), sequence)
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(name = %session.name, error = %e, "Sequence check on missing session");
                return Flow::Continue;
            }
        };

        if let SequenceVerdict::Replay {
            sequence,
            last_accepted,
        } = verdict
        {
            warn!(name = %session.name, sequence, last_accepted, "Replay rejected");
            session.reply(&ServerMessage::Replay {
                sequence,
                last_accepted,
            });
            return Flow::Continue;
        }

        let command = match ClientCommand::parse(body) {
            Ok(command) => command,
            Err(e) => {
                self.warn_loss(session, &verdict, WarningScope::Sender);
                self.protocol_error(session, e);
                return Flow::Continue;
            }
        };

        trace!(name = %session.name, sequence, "Dispatching command");
        self.execute(session, &verdict, command)
    }

    fn execute(&self, session: &mut SessionContext, verdict: &SequenceVerdict, command: ClientCommand) -> Flow {
        let registry = self.router.registry();

        match command {
            ClientCommand::Quit => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                return Flow::Quit;
            }
            ClientCommand::Help => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                session.reply(&ServerMessage::Help { unknown: None });
            }
            ClientCommand::Unknown { command } => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                debug!(name = %session.name, command = %command, "Unknown command");
                session.reply(&ServerMessage::Help {
                    unknown: Some(command),
                });
            }
            ClientCommand::UserCount => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                session.reply(&ServerMessage::UserCount(registry.authenticated_count()));
            }
            ClientCommand::List => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                let names = registry
                    .snapshot()
                    .iter()
                    .map(|handle| handle.name().to_string())
                    .collect();
                session.reply(&ServerMessage::UserList(names));
            }
            ClientCommand::Nickname { name } => {
                self.warn_loss(session, verdict, WarningScope::Sender);
                self.rename(session, &name);
            }
            ClientCommand::Chat { text } => {
                self.warn_loss(session, verdict, WarningScope::Everyone);
                self.router.broadcast_chat(&session.name, &text);
            }
            ClientCommand::Msg { target, text } => {
                self.warn_loss(session, verdict, WarningScope::SenderAnd(&target));
                if self.router.unicast_chat(&target, &session.name, &text).is_err() {
                    session.reply(&ServerMessage::NotConnected { name: target });
                }
            }
            ClientCommand::File { target, filename } => {
                self.warn_loss(session, verdict, WarningScope::SenderAnd(&target));
                if registry.lookup_authenticated(&target).is_none() {
                    session.reply(&ServerMessage::NotConnected { name: target });
                    return Flow::Continue;
                }
                if let Ok(Some(previous)) = registry.begin_transfer(session.handle.id(), &target) {
                    warn!(name = %session.name, previous = %previous, "New /file while a transfer is pending");
                }
                info!(from = %session.name, to = %target, filename = %filename, "File transfer started");
                self.relay(
                    session,
                    &target,
                    ServerMessage::File {
                        sender: session.name.to_string(),
                        filename,
                    },
                );
            }
            ClientCommand::Buffer { target, chunk } => {
                self.warn_loss(session, verdict, WarningScope::SenderAnd(&target));
                let missing = ProtocolError::BufferWithoutHeader {
                    sender: session.name.to_string(),
                };
                if let Err(e) = self.check_transfer_target(session, &target, missing) {
                    self.protocol_error(session, e);
                    return Flow::Continue;
                }
                if let Err(e) = decode_b64(&chunk) {
                    self.protocol_error(session, e);
                    return Flow::Continue;
                }
                trace!(from = %session.name, to = %target, len = chunk.len(), "Relaying chunk");
                self.relay(
                    session,
                    &target,
                    ServerMessage::Buffer {
                        sender: session.name.to_string(),
                        chunk,
                    },
                );
            }
            ClientCommand::EndOfTransfer { target, filename } => {
                self.warn_loss(session, verdict, WarningScope::SenderAnd(&target));
                let missing = ProtocolError::EndWithoutTransfer;
                if let Err(e) = self.check_transfer_target(session, &target, missing) {
                    self.protocol_error(session, e);
                    return Flow::Continue;
                }
                let _ = registry.end_transfer(session.handle.id());
                info!(from = %session.name, to = %target, filename = %filename, "File transfer finished");
                self.relay(
                    session,
                    &target,
                    ServerMessage::EndOfFile {
                        sender: session.name.to_string(),
                        filename,
                    },
                );
            }
        }

        Flow::Continue
    }

    /// Chunks and the end marker must go to the receiver named by `/file`
    fn check_transfer_target(
        &self,
        session: &SessionContext,
        target: &str,
        missing: ProtocolError,
    ) -> Result<(), ProtocolError> {
        match self.router.registry().pending_transfer(session.handle.id()) {
            None => Err(missing),
            Some(expected) if expected != target => {
                Err(ProtocolError::TransferTargetMismatch {
                    expected,
                    target: target.to_string(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Unicast a transfer envelope, telling the sender when the target is gone
    fn relay(&self, session: &SessionContext, target: &str, message: ServerMessage) {
        if self.router.unicast(target, &message).is_err() {
            session.reply(&ServerMessage::NotConnected {
                name: target.to_string(),
            });
        }
    }

    fn rename(&self, session: &mut SessionContext, requested: &str) {
        let new_name = match DisplayName::new(requested) {
            Ok(name) => name,
            Err(_) => {
                session.reply(&ServerMessage::InvalidName {
                    name: requested.to_string(),
                });
                return;
            }
        };

        match self
            .router
            .registry()
            .rename(session.handle.id(), new_name.clone())
        {
            Ok(old_name) => {
                info!(from = %old_name, to = %new_name, "Session renamed");
                session.name = new_name.clone();
                self.router.broadcast(&ServerMessage::Notice {
                    text: format!("{} is now known as {}", old_name, new_name),
                });
            }
            Err(RegistryError::NameInUse { name }) => {
                session.reply(&ServerMessage::NameInUse { name });
            }
            Err(e) => {
                session.reply(&ServerMessage::Error {
                    text: e.to_string(),
                });
            }
        }
    }

    fn warn_loss(&self, session: &SessionContext, verdict: &SequenceVerdict, scope: WarningScope<'_>) {
        let Some(warning) = ServerMessage::loss_warning(verdict, &session.name) else {
            return;
        };
        warn!(name = %session.name, ?verdict, "Messages lost");

        match scope {
            WarningScope::Sender => session.reply(&warning),
            WarningScope::Everyone => {
                self.router.broadcast(&warning);
            }
            WarningScope::SenderAnd(target) => {
                session.reply(&warning);
                if target != session.name.as_str() {
                    // Unknown targets are reported by the command itself
                    let _ = self.router.unicast(target, &warning);
                }
            }
        }
    }

    fn protocol_error(&self, session: &SessionContext, error: ProtocolError) {
        debug!(name = %session.name, error = %error, "Protocol error");
        session.reply(&ServerMessage::Error {
            text: error.to_string(),
        });
    }
}
