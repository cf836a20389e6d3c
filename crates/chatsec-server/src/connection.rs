//! Connection handler
//!
//! One task per accepted socket. The read half is driven here, line by line;
//! the write half belongs to a writer task draining the session's outbound
//! queue, so nothing that holds the registry lock ever touches the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use chatsec_core::protocol::wire::trim_line;
use chatsec_core::{DisplayName, ProtocolError, ServerMessage, SessionId};

use crate::logic::{AuthOutcome, AuthStateMachine, Flow, SessionContext};
use crate::managers::{Connection, SessionHandle};
use crate::runtime::ServerContext;

/// Grace period for flushing queued lines after a session ends
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const QUIT_COMMAND: &str = "/quit";

// ----------------------------------------------------------------------------
// Line Reading
// ----------------------------------------------------------------------------

/// Result of reading one inbound line
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LineRead {
    Line(String),
    TooLong(usize),
    Eof,
}

/// Read one `\n`-terminated line of at most `max` bytes, not counting the
/// `\r\n` or `\n` terminator.
///
/// Oversized lines are consumed up to their newline and reported.
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, max: usize) -> io::Result<LineRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = (max as u64).saturating_add(2);
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(LineRead::Eof);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.len() > max {
            return Ok(LineRead::TooLong(buf.len()));
        }
    } else if buf.len() > max {
        let length = buf.len();
        discard_rest_of_line(reader).await?;
        return Ok(LineRead::TooLong(length));
    }

    let line = String::from_utf8_lossy(buf);
    Ok(LineRead::Line(trim_line(&line).to_string()))
}

async fn discard_rest_of_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Drain the outbound queue into the socket until every sender is gone
async fn write_loop(mut outbound: mpsc::Receiver<String>, mut writer: OwnedWriteHalf) {
    while let Some(mut line) = outbound.recv().await {
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            debug!(error = %e, "Socket write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

// ----------------------------------------------------------------------------
// Connection Handler
// ----------------------------------------------------------------------------

/// Why a connection ended
#[derive(Debug)]
enum ExitReason {
    Eof,
    Quit,
    Kicked,
    Shutdown,
    HandshakeTimeout,
    Io(io::Error),
}

/// Drives one accepted connection from accept to close
pub struct ConnectionHandler {
    context: Arc<ServerContext>,
    session: SessionId,
    peer: SocketAddr,
}

impl ConnectionHandler {
    pub fn new(context: Arc<ServerContext>, session: SessionId, peer: SocketAddr) -> Self {
        Self {
            context,
            session,
            peer,
        }
    }

    /// Register, run the session, then release everything it held
    pub async fn run(self, stream: TcpStream, shutdown: watch::Receiver<bool>) {
        let (read_half, mut write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.context.config.outbound_buffer);
        let connection = Connection::new(self.session, tx);
        let kick = connection.kick_signal();

        let handle = match self
            .context
            .registry
            .register(DisplayName::provisional(self.session), connection)
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(session = %self.session, peer = %self.peer, error = %e, "Connection refused");
                let refusal = ServerMessage::ServerFull {
                    max: self.context.registry.max_sessions(),
                };
                let _ = write_half
                    .write_all(format!("{}\n", refusal).as_bytes())
                    .await;
                let _ = write_half.shutdown().await;
                return;
            }
        };

        info!(session = %self.session, peer = %self.peer, "Connection accepted");
        let mut writer = tokio::spawn(write_loop(rx, write_half));
        handle.send(&ServerMessage::Prompt);

        let mut auth = AuthStateMachine::new(
            self.session,
            Arc::clone(&self.context.engine),
            Arc::clone(&self.context.server_keys),
            Arc::clone(&self.context.registry),
        );
        let mut session: Option<SessionContext> = None;

        let reason = self
            .read_loop(read_half, &handle, &kick, shutdown, &mut auth, &mut session)
            .await;

        self.teardown(handle, session, reason);

        if timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            warn!(session = %self.session, "Writer did not drain in time");
            writer.abort();
        }
    }

    async fn read_loop(
        &self,
        read_half: OwnedReadHalf,
        handle: &SessionHandle,
        kick: &Notify,
        mut shutdown: watch::Receiver<bool>,
        auth: &mut AuthStateMachine,
        session: &mut Option<SessionContext>,
    ) -> ExitReason {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        let max = self.context.config.max_line_length;
        let deadline = self
            .context
            .config
            .handshake_timeout()
            .map(|limit| Instant::now() + limit);

        loop {
            let authenticated = session.is_some();
            tokio::select! {
                _ = kick.notified() => break ExitReason::Kicked,
                _ = shutdown.changed() => break ExitReason::Shutdown,
                _ = deadline_elapsed(deadline), if !authenticated && deadline.is_some() => {
                    break ExitReason::HandshakeTimeout
                }
                read = read_line(&mut reader, &mut buf, max) => match read {
                    Ok(LineRead::Eof) => break ExitReason::Eof,
                    Ok(LineRead::TooLong(length)) => {
                        handle.send(&ServerMessage::Error {
                            text: ProtocolError::LineTooLong { length, max }.to_string(),
                        });
                    }
                    Ok(LineRead::Line(line)) => {
                        if self.on_line(&line, handle, auth, session) == Flow::Quit {
                            break ExitReason::Quit;
                        }
                    }
                    Err(e) => break ExitReason::Io(e),
                },
            }
        }
    }

    fn on_line(
        &self,
        line: &str,
        handle: &SessionHandle,
        auth: &mut AuthStateMachine,
        session: &mut Option<SessionContext>,
    ) -> Flow {
        if let Some(context) = session.as_mut() {
            return self.context.dispatcher.dispatch(context, line);
        }

        // Leaving is allowed at any point of the handshake
        if line.trim() == QUIT_COMMAND {
            debug!(session = %self.session, "Quit before authentication");
            return Flow::Quit;
        }

        let step = auth.handle_line(line);
        for reply in &step.replies {
            handle.send(reply);
        }

        if let AuthOutcome::Authenticated { name, count } = step.outcome {
            let current = self
                .context
                .registry
                .lookup_authenticated(&name)
                .unwrap_or_else(|| handle.clone());
            *session = Some(SessionContext::new(current, name.clone()));
            self.context.router.broadcast(&ServerMessage::Joined {
                name: name.to_string(),
                count,
            });
        }
        Flow::Continue
    }

    fn teardown(&self, handle: SessionHandle, session: Option<SessionContext>, reason: ExitReason) {
        match &reason {
            ExitReason::Kicked => handle.send(&ServerMessage::Notice {
                text: "You have been disconnected by the server".to_string(),
            }),
            ExitReason::Shutdown => handle.send(&ServerMessage::Notice {
                text: "Server is shutting down".to_string(),
            }),
            ExitReason::HandshakeTimeout => handle.send(&ServerMessage::Error {
                text: "Authentication timed out".to_string(),
            }),
            _ => true,
        };

        if let Some(context) = &session {
            if !matches!(reason, ExitReason::Eof | ExitReason::Io(_)) {
                handle.send(&ServerMessage::Bye {
                    name: context.name().to_string(),
                });
            }
        }

        let Some(departure) = self.context.registry.unregister_id(self.session) else {
            return;
        };

        match &reason {
            ExitReason::Io(e) => {
                info!(session = %self.session, name = %departure.handle.name(), error = %e, "Connection lost")
            }
            other => {
                info!(session = %self.session, name = %departure.handle.name(), reason = ?other, "Connection closed")
            }
        }

        if departure.authenticated {
            self.context.router.broadcast(&ServerMessage::Left {
                name: departure.handle.name().to_string(),
                count: departure.remaining,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_variants() {
        let input: &[u8] = b"alice\r\n\nthis line is far too long\nok\nlast";
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::Line("alice".to_string())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::Line(String::new())
        );
        assert!(matches!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::TooLong(_)
        ));
        assert_eq!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::Line("ok".to_string())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::Line("last".to_string())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 10).await.unwrap(),
            LineRead::Eof
        );
    }

    #[tokio::test]
    async fn test_line_limit_excludes_terminator() {
        let input: &[u8] = b"abcde\r\nabcde\nabcdef\r\nabcdef\nok\n";
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut reader, &mut buf, 5).await.unwrap(),
            LineRead::Line("abcde".to_string())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 5).await.unwrap(),
            LineRead::Line("abcde".to_string())
        );
        assert!(matches!(
            read_line(&mut reader, &mut buf, 5).await.unwrap(),
            LineRead::TooLong(_)
        ));
        assert_eq!(
            read_line(&mut reader, &mut buf, 5).await.unwrap(),
            LineRead::TooLong(6)
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, 5).await.unwrap(),
            LineRead::Line("ok".to_string())
        );
    }

    #[tokio::test]
    async fn test_unbounded_limit_does_not_overflow() {
        let input: &[u8] = b"hello\n";
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();

        assert_eq!(
            read_line(&mut reader, &mut buf, usize::MAX).await.unwrap(),
            LineRead::Line("hello".to_string())
        );
        assert_eq!(
            read_line(&mut reader, &mut buf, usize::MAX).await.unwrap(),
            LineRead::Eof
        );
    }
}
