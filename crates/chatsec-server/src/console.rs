//! Server console
//!
//! Operator commands read from the server's stdin: `/list`, `/kill <name>`,
//! `/broadcast <text>` and `/shutdown <minutes>`. They act through the same
//! registry and router the connection tasks use.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use chatsec_core::{ProtocolError, ServerMessage};

use crate::logic::MessageRouter;
use crate::managers::SessionRegistry;
use crate::runtime::ShutdownHandle;

/// Longest accepted `/shutdown` delay (one week)
pub const MAX_SHUTDOWN_MINUTES: u64 = 7 * 24 * 60;

/// A parsed operator command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Kill { name: String },
    Broadcast { text: String },
    Shutdown { minutes: u64 },
    Help,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        let (command, args) = match line.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (line, ""),
        };

        match command {
            "/list" => Ok(ConsoleCommand::List),
            "/help" => Ok(ConsoleCommand::Help),
            "/kill" if !args.is_empty() => Ok(ConsoleCommand::Kill {
                name: args.to_string(),
            }),
            "/kill" => Err(ProtocolError::IncompleteCommand {
                usage: "/kill <name>",
            }),
            "/broadcast" if !args.is_empty() => Ok(ConsoleCommand::Broadcast {
                text: args.to_string(),
            }),
            "/broadcast" => Err(ProtocolError::IncompleteCommand {
                usage: "/broadcast <text>",
            }),
            "/shutdown" => match args.parse::<u64>() {
                Ok(minutes) if minutes <= MAX_SHUTDOWN_MINUTES => {
                    Ok(ConsoleCommand::Shutdown { minutes })
                }
                Ok(minutes) => Err(ProtocolError::Generic {
                    message: format!(
                        "Shutdown delay {} exceeds {} minutes",
                        minutes, MAX_SHUTDOWN_MINUTES
                    ),
                }),
                Err(_) => Err(ProtocolError::IncompleteCommand {
                    usage: "/shutdown <minutes>",
                }),
            },
            other => Err(ProtocolError::Generic {
                message: format!("Command {} unknown", other),
            }),
        }
    }
}

const CONSOLE_HELP: &[&str] = &[
    "/list : list sessions",
    "/kill <name> : disconnect a user",
    "/broadcast <text> : send a server notice to everyone",
    "/shutdown <minutes> : stop the server after a delay",
];

/// Operator console bound to a running server
pub struct ServerConsole {
    registry: Arc<SessionRegistry>,
    router: MessageRouter,
    shutdown: ShutdownHandle,
}

impl ServerConsole {
    pub fn new(registry: Arc<SessionRegistry>, router: MessageRouter, shutdown: ShutdownHandle) -> Self {
        Self {
            registry,
            router,
            shutdown,
        }
    }

    /// Run one command and return the lines to show the operator
    pub fn execute(&self, command: ConsoleCommand) -> Vec<String> {
        match command {
            ConsoleCommand::List => {
                let sessions = self.registry.sessions();
                let mut lines = vec![format!(
                    "{} session(s), {} authenticated",
                    sessions.len(),
                    sessions.iter().filter(|s| s.authenticated).count()
                )];
                lines.extend(sessions.iter().map(|s| {
                    format!(
                        "{} {} auth={} seq={} transfer={}",
                        s.id,
                        s.name,
                        s.authenticated,
                        s.last_sequence,
                        s.pending_transfer.as_deref().unwrap_or("-")
                    )
                }));
                lines
            }
            ConsoleCommand::Kill { name } => match self.registry.lookup(&name) {
                Some(handle) => {
                    info!(name = %name, "Session kicked from console");
                    handle.kick();
                    vec![format!("{} disconnected", name)]
                }
                None => vec![format!("{} is not connected", name)],
            },
            ConsoleCommand::Broadcast { text } => {
                let report = self.router.broadcast(&ServerMessage::Notice { text });
                vec![format!("Delivered to {} session(s)", report.delivered)]
            }
            ConsoleCommand::Shutdown { minutes } => {
                self.schedule_shutdown(minutes);
                vec![format!("Shutdown in {} minute(s)", minutes)]
            }
            ConsoleCommand::Help => CONSOLE_HELP.iter().map(|line| line.to_string()).collect(),
        }
    }

    fn schedule_shutdown(&self, minutes: u64) {
        if minutes == 0 {
            info!("Shutdown requested from console");
            self.shutdown.shutdown();
            return;
        }

        self.router.broadcast(&ServerMessage::Notice {
            text: format!("Server will shut down in {} minute(s)", minutes),
        });
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(minutes.saturating_mul(60))).await;
            info!("Scheduled shutdown");
            shutdown.shutdown();
        });
    }

    /// Read commands from `input` until EOF or shutdown
    pub async fn run<R>(self, input: R)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Console input failed");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            match ConsoleCommand::parse(&line) {
                Ok(command) => {
                    for output in self.execute(command) {
                        println!("{}", output);
                    }
                }
                Err(e) => println!("{}", e),
            }

            if self.shutdown.is_shutdown() {
                break;
            }
        }
    }
}
