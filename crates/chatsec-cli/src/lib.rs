//! chatsec client library
//!
//! Driver for the chatsec line protocol used by the `chatsec` binary and by
//! tests that need a well-behaved client.

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;

pub use cli::Cli;
pub use client::{ChatClient, ClientEvent, ClientReader, ClientWriter};
pub use commands::UserInput;
pub use error::{CliError, Result};
pub use identity::ClientIdentity;
