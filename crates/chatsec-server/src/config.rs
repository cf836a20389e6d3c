//! Server configuration loading
//!
//! Layered with figment, lowest priority first:
//! - built-in defaults
//! - `chatsec.toml` in the working directory
//! - the file named by `--config`
//! - `CHATSEC_*` environment variables
//! - command line flags

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use tracing::debug;

use chatsec_core::ServerConfig;

use crate::cli::Cli;
use crate::error::Result;

/// Configuration file picked up from the working directory
pub const DEFAULT_CONFIG_FILE: &str = "chatsec.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CHATSEC_";

/// Base figment without command line overrides
pub fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(ServerConfig::default()))
        .merge(Toml::file(DEFAULT_CONFIG_FILE));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment.merge(Env::prefixed(ENV_PREFIX))
}

/// Apply the command line on top of `figment`, extract and validate
pub fn load_with_overrides(figment: Figment, cli: &Cli) -> Result<ServerConfig> {
    let mut figment = figment.merge(("port", cli.port));

    if let Some(bind) = &cli.bind {
        figment = figment.merge(("bind_address", bind.clone()));
    }
    if let Some(max) = cli.max_sessions {
        figment = figment.merge(("max_sessions", max));
    }
    if let Some(secs) = cli.handshake_timeout {
        figment = figment.merge(("handshake_timeout_secs", secs));
    }

    let config: ServerConfig = figment.extract()?;
    config.validate()?;
    debug!(?config, "Configuration loaded");
    Ok(config)
}

/// Load the full layered configuration for `cli`
pub fn load(cli: &Cli) -> Result<ServerConfig> {
    load_with_overrides(figment(cli.config.as_deref()), cli)
}

/// Render `config` as TOML, suitable for `chatsec.toml`
pub fn example_config(config: &ServerConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn defaults_only() -> Figment {
        Figment::new().merge(Serialized::defaults(ServerConfig::default()))
    }

    #[test]
    fn test_cli_overrides_defaults() {
        let cli = Cli::parse_from([
            "chatsec-server",
            "4000",
            "--bind",
            "127.0.0.1",
            "--max-sessions",
            "5",
            "--handshake-timeout",
            "30",
        ]);
        let config = load_with_overrides(defaults_only(), &cli).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.handshake_timeout_secs, Some(30));
        assert_eq!(config.challenge_size, ServerConfig::default().challenge_size);
    }

    #[test]
    fn test_toml_layer_below_cli() {
        let figment = defaults_only().merge(Toml::string(
            "max_sessions = 7\nport = 1234\nmax_line_length = 4096\n",
        ));
        let cli = Cli::parse_from(["chatsec-server", "2323"]);
        let config = load_with_overrides(figment, &cli).unwrap();

        assert_eq!(config.port, 2323);
        assert_eq!(config.max_sessions, 7);
        assert_eq!(config.max_line_length, 4096);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let figment = defaults_only().merge(Toml::string("challenge_size = 64\n"));
        let cli = Cli::parse_from(["chatsec-server", "2222"]);
        assert!(load_with_overrides(figment, &cli).is_err());

        let cli = Cli::parse_from(["chatsec-server", "2222", "--max-sessions", "0"]);
        assert!(load_with_overrides(defaults_only(), &cli).is_err());
    }

    #[test]
    fn test_example_config_reloads() {
        let rendered = example_config(&ServerConfig::default()).unwrap();
        let reloaded: ServerConfig = Figment::new()
            .merge(Toml::string(&rendered))
            .extract()
            .unwrap();
        assert_eq!(reloaded, ServerConfig::default());
    }
}
