//! Interpretation of what the user types
//!
//! Most lines go to the server untouched. `/file <name> <path>` is expanded
//! locally into a chunked transfer and `/quit` ends the session.

use std::path::PathBuf;

use chatsec_core::ProtocolError;

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Empty,
    Quit,
    /// Stream a local file to `target`
    SendFile { target: String, path: PathBuf },
    /// Anything else: chat text, `@name` messages, server commands
    Send(String),
}

impl UserInput {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(UserInput::Empty);
        }
        if line.trim() == "/quit" {
            return Ok(UserInput::Quit);
        }

        if let Some(args) = line.strip_prefix("/file") {
            if args.is_empty() || args.starts_with(' ') {
                return match args.trim().split_once(' ') {
                    Some((target, path)) if !path.trim().is_empty() => Ok(UserInput::SendFile {
                        target: target.to_string(),
                        path: PathBuf::from(path.trim()),
                    }),
                    _ => Err(ProtocolError::IncompleteCommand {
                        usage: "/file <name> <path>",
                    }),
                };
            }
        }

        Ok(UserInput::Send(line.to_string()))
    }
}
