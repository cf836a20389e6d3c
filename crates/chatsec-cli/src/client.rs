//! Client driver
//!
//! [`ChatClient`] runs the client half of the handshake on its own: it answers
//! `AUTH_PUBKEY` with the local public key and `AUTH_CHALL` with the challenge
//! re-encrypted for the server. Once logged in it prefixes every line with the
//! next sequence number and feeds incoming transfer envelopes into a
//! [`FileTransferCoordinator`].
//!
//! After login the client can be split into a [`ClientReader`] and a
//! [`ClientWriter`] so that incoming lines and user input are handled by
//! separate tasks.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use chatsec_core::protocol::wire::{encode_b64, sequenced};
use chatsec_core::{
    ChatError, ClientCommand, ClientConfig, CompletedTransfer, CryptoEngine,
    FileTransferCoordinator, ProtocolError, ServerMessage,
};

use crate::error::{CliError, Result};
use crate::identity::ClientIdentity;

/// Sent in place of a challenge response the client cannot compute
const ABANDON_RESPONSE: &str = "-";

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// Something the user should see
#[derive(Debug)]
pub enum ClientEvent {
    Message(ServerMessage),
    TransferStarted { sender: String, filename: String },
    TransferComplete(CompletedTransfer),
    TransferFailed { sender: String, error: ChatError },
}

// ----------------------------------------------------------------------------
// Reader
// ----------------------------------------------------------------------------

/// Receiving half of a connection
pub struct ClientReader {
    reader: BufReader<OwnedReadHalf>,
    line: String,
    transfers: Arc<Mutex<FileTransferCoordinator>>,
}

impl ClientReader {
    /// Next raw server message, `None` once the server closed the socket
    async fn read_message(&mut self) -> Result<Option<ServerMessage>> {
        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Ok(None);
        }
        let message = ServerMessage::parse(self.line.trim_end_matches('\n'));
        trace!(?message, "Server line");
        Ok(Some(message))
    }

    /// Next event, consuming `BUFFER` chunks silently
    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>> {
        loop {
            let Some(message) = self.read_message().await? else {
                return Ok(None);
            };

            let sender = match &message {
                ServerMessage::File { sender, .. }
                | ServerMessage::Buffer { sender, .. }
                | ServerMessage::EndOfFile { sender, .. } => sender.clone(),
                _ => return Ok(Some(ClientEvent::Message(message))),
            };

            // Sinks write through blocking file IO
            let transfers = Arc::clone(&self.transfers);
            let (message, outcome) = tokio::task::spawn_blocking(move || {
                let mut transfers = transfers
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let outcome = transfers.handle(&message);
                (message, outcome)
            })
            .await?;

            match outcome {
                Ok(Some(done)) => return Ok(Some(ClientEvent::TransferComplete(done))),
                Ok(None) => {
                    if let ServerMessage::File { filename, .. } = message {
                        return Ok(Some(ClientEvent::TransferStarted { sender, filename }));
                    }
                }
                Err(error) => {
                    warn!(sender = %sender, error = %error, "Incoming transfer failed");
                    return Ok(Some(ClientEvent::TransferFailed { sender, error }));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Writer
// ----------------------------------------------------------------------------

/// Sending half of a connection, owning the sequence counter
pub struct ClientWriter {
    writer: OwnedWriteHalf,
    sequence: u64,
    chunk_size: usize,
}

impl ClientWriter {
    async fn write_raw(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Last sequence number sent
    pub fn last_sequence(&self) -> u64 {
        self.sequence
    }

    /// Send one line body with the next sequence number
    pub async fn send(&mut self, body: &str) -> Result<u64> {
        self.sequence += 1;
        let line = sequenced(self.sequence, body);
        self.write_raw(&line).await?;
        Ok(self.sequence)
    }

    pub async fn send_command(&mut self, command: &ClientCommand) -> Result<u64> {
        self.send(&command.to_string()).await
    }

    /// Stream a local file to `target` as `/file`, `/buffer`..., `/endoftransfer`
    pub async fn send_file(&mut self, target: &str, path: &Path) -> Result<u64> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ProtocolError::InvalidFileName {
                filename: path.display().to_string(),
            })?
            .to_string();
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| CliError::FileRead {
                path: path.to_path_buf(),
                source,
            })?;

        self.send_bytes(target, &filename, &data).await?;
        Ok(data.len() as u64)
    }

    /// Stream `data` to `target` under `filename`
    pub async fn send_bytes(&mut self, target: &str, filename: &str, data: &[u8]) -> Result<()> {
        self.send_command(&ClientCommand::File {
            target: target.to_string(),
            filename: filename.to_string(),
        })
        .await?;

        let mut chunks = 0usize;
        for chunk in data.chunks(self.chunk_size) {
            self.send_command(&ClientCommand::Buffer {
                target: target.to_string(),
                chunk: encode_b64(chunk),
            })
            .await?;
            chunks += 1;
        }

        self.send_command(&ClientCommand::EndOfTransfer {
            target: target.to_string(),
            filename: filename.to_string(),
        })
        .await?;

        info!(to = %target, filename = %filename, bytes = data.len(), chunks, "File sent");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Chat Client
// ----------------------------------------------------------------------------

/// A connection to a chat server, before and after login
pub struct ChatClient {
    reader: ClientReader,
    writer: ClientWriter,
    engine: Arc<dyn CryptoEngine>,
    identity: ClientIdentity,
    name: Option<String>,
}

impl ChatClient {
    pub async fn connect(
        address: &str,
        engine: Arc<dyn CryptoEngine>,
        identity: ClientIdentity,
        transfers: FileTransferCoordinator,
        chunk_size: usize,
    ) -> Result<Self> {
        let stream = TcpStream::connect(address).await?;
        debug!(address, "Connected");
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: ClientReader {
                reader: BufReader::new(read_half),
                line: String::new(),
                transfers: Arc::new(Mutex::new(transfers)),
            },
            writer: ClientWriter {
                writer: write_half,
                sequence: 0,
                chunk_size: chunk_size.max(1),
            },
            engine,
            identity,
            name: None,
        })
    }

    /// Connect with received files written under `config.download_dir`
    pub async fn connect_with_config(
        config: &ClientConfig,
        engine: Arc<dyn CryptoEngine>,
        identity: ClientIdentity,
    ) -> Result<Self> {
        let transfers = FileTransferCoordinator::with_directory(config.download_dir.clone());
        Self::connect(&config.server_address(), engine, identity, transfers, config.chunk_size).await
    }

    /// Name the server greeted us with, once logged in
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Log in as `name`.
    ///
    /// A refused name or failed challenge leaves the connection at the name
    /// prompt, so `login` may be called again. A challenge for a name whose
    /// key this identity does not hold is abandoned and reported as
    /// [`CliError::UnknownServerKey`].
    pub async fn login(&mut self, name: &str) -> Result<()> {
        self.await_prompt().await?;
        self.writer.write_raw(name).await?;

        let mut abandoned = false;
        loop {
            let message = self
                .reader
                .read_message()
                .await?
                .ok_or(CliError::ConnectionClosed)?;

            match message {
                ServerMessage::AuthPubkey(key) => {
                    debug!(fingerprint = %key.fingerprint(), "Server key received");
                    self.identity.remember_server_key(key);
                    let wire = self.identity.public_key().to_wire();
                    self.writer.write_raw(&wire).await?;
                }
                ServerMessage::AuthChallenge(challenge) => {
                    match self.identity.answer(self.engine.as_ref(), &challenge) {
                        Ok(response) => self.writer.write_raw(&response).await?,
                        Err(CliError::UnknownServerKey) => {
                            warn!(name = %name, "Challenged without a known server key, giving up on this name");
                            abandoned = true;
                            self.writer.write_raw(ABANDON_RESPONSE).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ServerMessage::Hello { name } => {
                    info!(name = %name, "Logged in");
                    self.name = Some(name);
                    return Ok(());
                }
                ServerMessage::AuthFailed if abandoned => return Err(CliError::UnknownServerKey),
                ServerMessage::AuthFailed => return Err(CliError::AuthenticationFailed),
                refusal @ (ServerMessage::NameInUse { .. }
                | ServerMessage::InvalidName { .. }
                | ServerMessage::ServerFull { .. }) => {
                    return Err(CliError::Refused(refusal.to_string()));
                }
                ServerMessage::Error { text } => return Err(CliError::Refused(text)),
                other => debug!(?other, "Ignored during login"),
            }
        }
    }

    async fn await_prompt(&mut self) -> Result<()> {
        loop {
            match self.reader.read_message().await? {
                Some(ServerMessage::Prompt) => return Ok(()),
                Some(refusal @ ServerMessage::ServerFull { .. }) => {
                    return Err(CliError::Refused(refusal.to_string()));
                }
                Some(other) => debug!(?other, "Ignored before prompt"),
                None => return Err(CliError::ConnectionClosed),
            }
        }
    }

    fn ensure_logged_in(&self) -> Result<()> {
        if self.name.is_none() {
            return Err(CliError::NotAuthenticated);
        }
        Ok(())
    }

    pub async fn send(&mut self, body: &str) -> Result<u64> {
        self.ensure_logged_in()?;
        self.writer.send(body).await
    }

    pub async fn send_command(&mut self, command: &ClientCommand) -> Result<u64> {
        self.ensure_logged_in()?;
        self.writer.send_command(command).await
    }

    pub async fn send_file(&mut self, target: &str, path: &Path) -> Result<u64> {
        self.ensure_logged_in()?;
        self.writer.send_file(target, path).await
    }

    pub async fn next_event(&mut self) -> Result<Option<ClientEvent>> {
        self.reader.next_event().await
    }

    /// Split into independently usable halves, keeping the identity
    pub fn into_split(self) -> (ClientReader, ClientWriter, ClientIdentity) {
        (self.reader, self.writer, self.identity)
    }
}
