//! Chat server
//!
//! TCP chat server authenticating users with a public-key challenge before
//! admitting them to a shared room. Every line after authentication carries
//! a sequence number checked against replay.
//!
//! - [`managers`] owns shared state: sessions, credentials, sequence guards
//! - [`logic`] holds the authentication state machine, routing and commands
//! - [`connection`] drives one socket; [`runtime`] accepts them
//! - [`console`] is the operator's stdin interface

pub mod cli;
pub mod config;
pub mod connection;
pub mod console;
pub mod error;
pub mod logic;
pub mod managers;
pub mod runtime;

pub use cli::Cli;
pub use console::{ConsoleCommand, ServerConsole};
pub use error::{Result, ServerError};
pub use logic::{AuthStateMachine, CommandDispatcher, MessageRouter};
pub use managers::{CredentialStore, SessionHandle, SessionRegistry};
pub use runtime::{ChatServer, ServerContext, ShutdownHandle};
