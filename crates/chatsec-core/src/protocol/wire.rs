//! Line-oriented wire format
//!
//! Every message is one UTF-8 line. Server output is modelled by
//! [`ServerMessage`], client input by [`ClientCommand`]; binary payloads
//! (keys, challenges, file chunks) travel as base64 tokens.

use core::fmt;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;

use crate::crypto::PublicKey;
use crate::errors::ProtocolError;
use crate::protocol::sequence::SequenceVerdict;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Prefix of every server notice
pub const SERVER_TAG: &str = "[SERVER]";

/// Prefix of relayed chat lines
pub const MSG_TAG: &str = "[MSG]";

/// Name prompt sent after accept and after every handshake reset
pub const NAME_PROMPT: &str = "Please enter your name";

/// Header line of the `/list` answer
pub const USER_LIST_HEADER: &str = "List of Users :";

/// Usage line for every client command, in help order
pub const COMMAND_USAGE: &[(&str, &str)] = &[
    ("/quit", "leave the chat"),
    ("/nusers", "number of connected users"),
    ("/list", "list connected users"),
    ("/nickname <name>", "change your name"),
    ("/msg <name> <text>", "private message (same as @<name> <text>)"),
    ("/file <name> <filename>", "start sending a file"),
    ("/buffer <name> <base64>", "send a chunk of the current file"),
    ("/endoftransfer <name> <filename>", "finish sending a file"),
    ("/help", "show this help"),
];

/// Base64 codec: padded on encode, padding optional on decode
const B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ----------------------------------------------------------------------------
// Line Helpers
// ----------------------------------------------------------------------------

/// Encode a binary payload as a base64 token
pub fn encode_b64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Decode a base64 token, with or without padding
pub fn decode_b64(token: &str) -> Result<Vec<u8>, ProtocolError> {
    B64.decode(token.trim())
        .map_err(|_| ProtocolError::InvalidBase64)
}

/// Strip the trailing `\r` left by CRLF peers
pub fn trim_line(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

/// Prefix a command body with its sequence number
pub fn sequenced(sequence: u64, body: &str) -> String {
    format!("{} {}", sequence, body)
}

/// Split an authenticated line into its sequence number and body
pub fn split_sequence(line: &str) -> Result<(u64, &str), ProtocolError> {
    let line = line.trim_start();
    if line.is_empty() {
        return Err(ProtocolError::MissingSequence);
    }

    let (token, body) = match line.split_once(' ') {
        Some((token, body)) => (token, body),
        None => (line, ""),
    };

    let sequence = token
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidSequence {
            value: token.to_string(),
        })?;

    Ok((sequence, body))
}

/// Split `<word> <rest>` where both parts must be non-empty
fn split_target<'a>(args: &'a str, usage: &'static str) -> Result<(&'a str, &'a str), ProtocolError> {
    let args = args.trim_start();
    match args.split_once(' ') {
        Some((target, rest)) if !target.is_empty() && !rest.trim().is_empty() => {
            Ok((target, rest.trim_start()))
        }
        _ => Err(ProtocolError::IncompleteCommand { usage }),
    }
}

/// Single non-empty word argument
fn single_word(args: &str, usage: &'static str) -> Result<String, ProtocolError> {
    let mut words = args.split_whitespace();
    match (words.next(), words.next()) {
        (Some(word), None) => Ok(word.to_string()),
        _ => Err(ProtocolError::IncompleteCommand { usage }),
    }
}

// ----------------------------------------------------------------------------
// Client Commands
// ----------------------------------------------------------------------------

/// A parsed post-authentication client line body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    Help,
    UserCount,
    List,
    Nickname { name: String },
    Msg { target: String, text: String },
    File { target: String, filename: String },
    Buffer { target: String, chunk: String },
    EndOfTransfer { target: String, filename: String },
    /// Plain chat text, broadcast to everyone
    Chat { text: String },
    /// Slash command nobody knows about
    Unknown { command: String },
}

impl ClientCommand {
    /// Parse a line body (the part after the sequence number)
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let body = trim_line(body);

        if let Some(rest) = body.strip_prefix('@') {
            let (target, text) = split_target(rest, "@<name> <text>")?;
            return Ok(ClientCommand::Msg {
                target: target.to_string(),
                text: text.to_string(),
            });
        }

        if !body.starts_with('/') {
            if body.trim().is_empty() {
                return Err(ProtocolError::from("Empty message"));
            }
            return Ok(ClientCommand::Chat {
                text: body.to_string(),
            });
        }

        let (command, args) = match body.split_once(' ') {
            Some((command, args)) => (command, args),
            None => (body, ""),
        };

        let parsed = match command {
            "/quit" => ClientCommand::Quit,
            "/help" => ClientCommand::Help,
            "/nusers" => ClientCommand::UserCount,
            "/list" => ClientCommand::List,
            "/nickname" => ClientCommand::Nickname {
                name: single_word(args, "/nickname <name>")?,
            },
            "/msg" => {
                let (target, text) = split_target(args, "/msg <name> <text>")?;
                ClientCommand::Msg {
                    target: target.to_string(),
                    text: text.to_string(),
                }
            }
            "/file" => {
                let (target, filename) = split_target(args, "/file <name> <filename>")?;
                ClientCommand::File {
                    target: target.to_string(),
                    filename: filename.trim_end().to_string(),
                }
            }
            "/buffer" => {
                let (target, chunk) = split_target(args, "/buffer <name> <base64>")?;
                ClientCommand::Buffer {
                    target: target.to_string(),
                    chunk: chunk.trim_end().to_string(),
                }
            }
            "/endoftransfer" => {
                let (target, filename) =
                    split_target(args, "/endoftransfer <name> <filename>")?;
                ClientCommand::EndOfTransfer {
                    target: target.to_string(),
                    filename: filename.trim_end().to_string(),
                }
            }
            other => ClientCommand::Unknown {
                command: other.to_string(),
            },
        };

        Ok(parsed)
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientCommand::Quit => f.write_str("/quit"),
            ClientCommand::Help => f.write_str("/help"),
            ClientCommand::UserCount => f.write_str("/nusers"),
            ClientCommand::List => f.write_str("/list"),
            ClientCommand::Nickname { name } => write!(f, "/nickname {}", name),
            ClientCommand::Msg { target, text } => write!(f, "/msg {} {}", target, text),
            ClientCommand::File { target, filename } => write!(f, "/file {} {}", target, filename),
            ClientCommand::Buffer { target, chunk } => write!(f, "/buffer {} {}", target, chunk),
            ClientCommand::EndOfTransfer { target, filename } => {
                write!(f, "/endoftransfer {} {}", target, filename)
            }
            ClientCommand::Chat { text } => f.write_str(text),
            ClientCommand::Unknown { command } => f.write_str(command),
        }
    }
}

// ----------------------------------------------------------------------------
// Server Messages
// ----------------------------------------------------------------------------

/// Everything the server writes to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Prompt,
    NameInUse { name: String },
    InvalidName { name: String },
    AuthPubkey(PublicKey),
    AuthChallenge(Vec<u8>),
    AuthFailed,
    Hello { name: String },
    Joined { name: String, count: usize },
    Left { name: String, count: usize },
    Bye { name: String },
    ServerFull { max: usize },
    Replay { sequence: u64, last_accepted: u64 },
    LostOne { sequence: u64, sender: String },
    LostRange { first: u64, last: u64, sender: String },
    Error { text: String },
    /// Free-form server notice (`[SERVER] <text>`)
    Notice { text: String },
    NotConnected { name: String },
    Broadcast { sender: String, text: String },
    Private { sender: String, text: String },
    File { sender: String, filename: String },
    Buffer { sender: String, chunk: String },
    EndOfFile { sender: String, filename: String },
    UserCount(usize),
    UserList(Vec<String>),
    Help { unknown: Option<String> },
    /// A line the client driver does not interpret
    Other(String),
}

impl ServerMessage {
    /// Parse one server line, as seen by the client driver
    pub fn parse(line: &str) -> Self {
        let line = trim_line(line);

        if line == NAME_PROMPT {
            return ServerMessage::Prompt;
        }
        if let Some(name) = line
            .strip_prefix("Pseudo ")
            .and_then(|rest| rest.strip_suffix(" is already connected"))
        {
            return ServerMessage::NameInUse {
                name: name.to_string(),
            };
        }
        if let Some(name) = line.strip_prefix("Invalid name ") {
            return ServerMessage::InvalidName {
                name: name.to_string(),
            };
        }
        if let Some(name) = line
            .strip_prefix("Sorry, ")
            .and_then(|rest| rest.strip_suffix(" is not connected to the chat"))
        {
            return ServerMessage::NotConnected {
                name: name.to_string(),
            };
        }

        if let Some(rest) = line.strip_prefix(SERVER_TAG).map(str::trim_start) {
            if let Some(key) = rest.strip_prefix("AUTH_PUBKEY ") {
                if let Ok(key) = PublicKey::from_wire(key) {
                    return ServerMessage::AuthPubkey(key);
                }
            } else if let Some(challenge) = rest.strip_prefix("AUTH_CHALL ") {
                if let Ok(challenge) = decode_b64(challenge) {
                    return ServerMessage::AuthChallenge(challenge);
                }
            } else if rest == "AUTH_FAILED" {
                return ServerMessage::AuthFailed;
            } else if let Some(max) = rest
                .strip_prefix("Server is full (")
                .and_then(|rest| rest.strip_suffix(" sessions)"))
                .and_then(|max| max.parse().ok())
            {
                return ServerMessage::ServerFull { max };
            } else if let Some(name) = rest
                .strip_prefix("Hello ")
                .and_then(|name| name.strip_suffix('!'))
            {
                return ServerMessage::Hello {
                    name: name.to_string(),
                };
            } else if let Some(name) = rest
                .strip_prefix("Bye ")
                .and_then(|name| name.strip_suffix('!'))
            {
                return ServerMessage::Bye {
                    name: name.to_string(),
                };
            } else if let Some(text) = rest.strip_prefix("ERROR ") {
                return ServerMessage::Error {
                    text: text.to_string(),
                };
            }
            return ServerMessage::Other(line.to_string());
        }

        if let Some(rest) = line.strip_prefix(MSG_TAG).map(str::trim_start) {
            if let Some(rest) = rest.strip_prefix("FROM_") {
                if let Some((sender, text)) = rest.split_once("> ") {
                    return ServerMessage::Private {
                        sender: sender.to_string(),
                        text: text.to_string(),
                    };
                }
            } else if let Some((sender, text)) = rest.split_once(" > ") {
                return ServerMessage::Broadcast {
                    sender: sender.to_string(),
                    text: text.to_string(),
                };
            }
            return ServerMessage::Other(line.to_string());
        }

        let envelope = |prefix: &str| {
            line.strip_prefix(prefix)
                .and_then(|rest| rest.split_once(' '))
                .map(|(sender, rest)| (sender.to_string(), rest.to_string()))
        };

        if let Some((sender, filename)) = envelope("FILE ") {
            ServerMessage::File { sender, filename }
        } else if let Some((sender, chunk)) = envelope("BUFFER ") {
            ServerMessage::Buffer { sender, chunk }
        } else if let Some((sender, filename)) = envelope("ENDOFFILE ") {
            ServerMessage::EndOfFile { sender, filename }
        } else {
            ServerMessage::Other(line.to_string())
        }
    }

    /// Loss warning for an accepted sequence with a gap
    pub fn loss_warning(verdict: &SequenceVerdict, sender: &str) -> Option<Self> {
        match *verdict {
            SequenceVerdict::OneLost { missing } => Some(ServerMessage::LostOne {
                sequence: missing,
                sender: sender.to_string(),
            }),
            SequenceVerdict::RangeLost { first, last } => Some(ServerMessage::LostRange {
                first,
                last,
                sender: sender.to_string(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMessage::Prompt => f.write_str(NAME_PROMPT),
            ServerMessage::NameInUse { name } => write!(f, "Pseudo {} is already connected", name),
            ServerMessage::InvalidName { name } => write!(f, "Invalid name {}", name),
            ServerMessage::AuthPubkey(key) => write!(f, "{} AUTH_PUBKEY {}", SERVER_TAG, key.to_wire()),
            ServerMessage::AuthChallenge(challenge) => {
                write!(f, "{} AUTH_CHALL {}", SERVER_TAG, encode_b64(challenge))
            }
            ServerMessage::AuthFailed => write!(f, "{} AUTH_FAILED", SERVER_TAG),
            ServerMessage::Hello { name } => write!(f, "{} Hello {}!", SERVER_TAG, name),
            ServerMessage::Joined { name, count } => write!(
                f,
                "{} {} has joined the chat / {} users connected.",
                SERVER_TAG, name, count
            ),
            ServerMessage::Left { name, count } => write!(
                f,
                "{} {} has left the chat / {} users connected.",
                SERVER_TAG, name, count
            ),
            ServerMessage::Bye { name } => write!(f, "{} Bye {}!", SERVER_TAG, name),
            ServerMessage::ServerFull { max } => {
                write!(f, "{} Server is full ({} sessions)", SERVER_TAG, max)
            }
            ServerMessage::Replay {
                sequence,
                last_accepted,
            } => write!(
                f,
                "{} REPLAY message {} rejected (last accepted {})",
                SERVER_TAG, sequence, last_accepted
            ),
            ServerMessage::LostOne { sequence, sender } => write!(
                f,
                "{} WARNING message {} from {} lost",
                SERVER_TAG, sequence, sender
            ),
            ServerMessage::LostRange {
                first,
                last,
                sender,
            } => write!(
                f,
                "{} WARNING messages {}-{} from {} lost",
                SERVER_TAG, first, last, sender
            ),
            ServerMessage::Error { text } => write!(f, "{} ERROR {}", SERVER_TAG, text),
            ServerMessage::Notice { text } => write!(f, "{} {}", SERVER_TAG, text),
            ServerMessage::NotConnected { name } => {
                write!(f, "Sorry, {} is not connected to the chat", name)
            }
            ServerMessage::Broadcast { sender, text } => {
                write!(f, "{} {} > {}", MSG_TAG, sender, text)
            }
            ServerMessage::Private { sender, text } => {
                write!(f, "{} FROM_{}> {}", MSG_TAG, sender, text)
            }
            ServerMessage::File { sender, filename } => write!(f, "FILE {} {}", sender, filename),
            ServerMessage::Buffer { sender, chunk } => write!(f, "BUFFER {} {}", sender, chunk),
            ServerMessage::EndOfFile { sender, filename } => {
                write!(f, "ENDOFFILE {} {}", sender, filename)
            }
            ServerMessage::UserCount(count) => write!(f, "{}", count),
            ServerMessage::UserList(names) => {
                f.write_str(USER_LIST_HEADER)?;
                for name in names {
                    write!(f, "\n{}", name)?;
                }
                Ok(())
            }
            ServerMessage::Help { unknown } => {
                if let Some(command) = unknown {
                    writeln!(f, "Command {} unknown", command)?;
                }
                f.write_str("Available commands :")?;
                for (usage, description) in COMMAND_USAGE {
                    write!(f, "\n{} : {}", usage, description)?;
                }
                Ok(())
            }
            ServerMessage::Other(line) => f.write_str(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sequence() {
        assert_eq!(split_sequence("5 hello world").unwrap(), (5, "hello world"));
        assert_eq!(split_sequence("12 /list").unwrap(), (12, "/list"));
        assert_eq!(split_sequence("7").unwrap(), (7, ""));
        assert_eq!(split_sequence(""), Err(ProtocolError::MissingSequence));
        assert!(matches!(
            split_sequence("hello world"),
            Err(ProtocolError::InvalidSequence { .. })
        ));
        assert!(split_sequence("-1 hi").is_err());
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ClientCommand::parse("/quit").unwrap(), ClientCommand::Quit);
        assert_eq!(ClientCommand::parse("/nusers").unwrap(), ClientCommand::UserCount);
        assert_eq!(
            ClientCommand::parse("/msg bob hi there").unwrap(),
            ClientCommand::Msg {
                target: "bob".into(),
                text: "hi there".into()
            }
        );
        assert_eq!(
            ClientCommand::parse("@bob hi").unwrap(),
            ClientCommand::Msg {
                target: "bob".into(),
                text: "hi".into()
            }
        );
        assert_eq!(
            ClientCommand::parse("/file bob report.txt").unwrap(),
            ClientCommand::File {
                target: "bob".into(),
                filename: "report.txt".into()
            }
        );
        assert_eq!(
            ClientCommand::parse("/frobnicate now").unwrap(),
            ClientCommand::Unknown {
                command: "/frobnicate".into()
            }
        );
        assert_eq!(
            ClientCommand::parse("hello all").unwrap(),
            ClientCommand::Chat {
                text: "hello all".into()
            }
        );
    }

    #[test]
    fn test_incomplete_commands() {
        for line in ["/msg bob", "/msg", "@bob", "/file bob", "/buffer bob ", "/nickname"] {
            assert!(
                matches!(
                    ClientCommand::parse(line),
                    Err(ProtocolError::IncompleteCommand { .. })
                ),
                "{line} should be incomplete"
            );
        }
        assert!(ClientCommand::parse("   ").is_err());
    }

    #[test]
    fn test_command_display_matches_parse() {
        let command = ClientCommand::EndOfTransfer {
            target: "bob".into(),
            filename: "report.txt".into(),
        };
        assert_eq!(command.to_string(), "/endoftransfer bob report.txt");
        assert_eq!(ClientCommand::parse(&command.to_string()).unwrap(), command);
    }

    #[test]
    fn test_server_message_text() {
        let joined = ServerMessage::Joined {
            name: "alice".into(),
            count: 2,
        };
        assert_eq!(
            joined.to_string(),
            "[SERVER] alice has joined the chat / 2 users connected."
        );
        assert_eq!(
            ServerMessage::Private {
                sender: "alice".into(),
                text: "psst".into()
            }
            .to_string(),
            "[MSG] FROM_alice> psst"
        );
        assert_eq!(
            ServerMessage::UserList(vec!["alice".into(), "bob".into()]).to_string(),
            "List of Users :\nalice\nbob"
        );
        let help = ServerMessage::Help {
            unknown: Some("/frobnicate".into()),
        }
        .to_string();
        assert!(help.starts_with("Command /frobnicate unknown\n"));
        assert_eq!(help.lines().count(), COMMAND_USAGE.len() + 2);
    }

    #[test]
    fn test_loss_warnings() {
        let range = SequenceVerdict::RangeLost { first: 6, last: 7 };
        assert_eq!(
            ServerMessage::loss_warning(&range, "alice").unwrap().to_string(),
            "[SERVER] WARNING messages 6-7 from alice lost"
        );
        let one = SequenceVerdict::OneLost { missing: 6 };
        assert_eq!(
            ServerMessage::loss_warning(&one, "alice").unwrap().to_string(),
            "[SERVER] WARNING message 6 from alice lost"
        );
        assert!(ServerMessage::loss_warning(&SequenceVerdict::InOrder, "alice").is_none());
    }

    #[test]
    fn test_client_side_parse() {
        assert_eq!(ServerMessage::parse(NAME_PROMPT), ServerMessage::Prompt);
        assert_eq!(
            ServerMessage::parse("[SERVER] Hello alice!\r"),
            ServerMessage::Hello {
                name: "alice".into()
            }
        );
        assert_eq!(ServerMessage::parse("[SERVER] AUTH_FAILED"), ServerMessage::AuthFailed);
        assert_eq!(
            ServerMessage::parse("Pseudo bob is already connected"),
            ServerMessage::NameInUse { name: "bob".into() }
        );
        assert_eq!(
            ServerMessage::parse("Sorry, carol is not connected to the chat"),
            ServerMessage::NotConnected {
                name: "carol".into()
            }
        );
        assert_eq!(
            ServerMessage::parse("[SERVER] Server is full (3 sessions)"),
            ServerMessage::ServerFull { max: 3 }
        );
        assert_eq!(
            ServerMessage::parse("BUFFER alice aGVsbG8="),
            ServerMessage::Buffer {
                sender: "alice".into(),
                chunk: "aGVsbG8=".into()
            }
        );
        assert_eq!(
            ServerMessage::parse("[MSG] bob > hi > there"),
            ServerMessage::Broadcast {
                sender: "bob".into(),
                text: "hi > there".into()
            }
        );
        assert!(matches!(
            ServerMessage::parse("[SERVER] bob has joined the chat / 2 users connected."),
            ServerMessage::Other(_)
        ));

        let challenge = vec![7u8; 128];
        let line = ServerMessage::AuthChallenge(challenge.clone()).to_string();
        assert_eq!(ServerMessage::parse(&line), ServerMessage::AuthChallenge(challenge));
    }

    #[test]
    fn test_base64_padding_optional() {
        assert_eq!(decode_b64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(decode_b64("aGVsbG8").unwrap(), b"hello");
        assert_eq!(decode_b64("%%%"), Err(ProtocolError::InvalidBase64));
    }
}
