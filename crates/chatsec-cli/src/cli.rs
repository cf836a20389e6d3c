//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal client for a chatsec server", long_about = None)]
pub struct Cli {
    /// Server host
    pub host: Option<String>,

    /// Server port
    pub port: Option<u16>,

    /// Display name to log in with (prompted when omitted)
    #[arg(short, long)]
    pub name: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory receiving incoming files
    #[arg(short, long)]
    pub download_dir: Option<PathBuf>,

    /// Identity file holding the key pair and learned server key
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}
