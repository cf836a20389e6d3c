//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authenticated multi-user chat server", long_about = None)]
pub struct Cli {
    /// TCP port to listen on
    pub port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Maximum simultaneous sessions
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Seconds a connection may spend before authenticating
    #[arg(long)]
    pub handshake_timeout: Option<u64>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,

    /// Do not read operator commands from stdin
    #[arg(long)]
    pub no_console: bool,
}
