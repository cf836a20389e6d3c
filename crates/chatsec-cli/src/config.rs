//! Client configuration loading
//!
//! Same layering as the server: defaults, `chatsec.toml`, `--config`,
//! `CHATSEC_*` variables, then command line flags.

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use chatsec_core::ClientConfig;

use crate::cli::Cli;
use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "chatsec.toml";

pub const ENV_PREFIX: &str = "CHATSEC_";

/// Base figment without command line overrides
pub fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(ClientConfig::default()))
        .merge(Toml::file(DEFAULT_CONFIG_FILE));

    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }

    figment.merge(Env::prefixed(ENV_PREFIX))
}

/// Apply the command line on top of `figment`, extract and validate
pub fn load_with_overrides(figment: Figment, cli: &Cli) -> Result<ClientConfig> {
    let mut figment = figment;

    if let Some(host) = &cli.host {
        figment = figment.merge(("host", host.clone()));
    }
    if let Some(port) = cli.port {
        figment = figment.merge(("port", port));
    }
    if let Some(dir) = &cli.download_dir {
        figment = figment.merge(("download_dir", dir.clone()));
    }
    if let Some(path) = &cli.identity {
        figment = figment.merge(("identity_file", path.clone()));
    }

    let config: ClientConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

pub fn load(cli: &Cli) -> Result<ClientConfig> {
    load_with_overrides(figment(cli.config.as_deref()), cli)
}

/// Render `config` as TOML
pub fn example_config(config: &ClientConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    fn defaults_only() -> Figment {
        Figment::new().merge(Serialized::defaults(ClientConfig::default()))
    }

    #[test]
    fn test_overrides_and_file_layer() {
        let figment = defaults_only().merge(Toml::string("chunk_size = 512\nhost = \"filehost\"\n"));
        let cli = Cli::parse_from(["chatsec", "cli-host", "--download-dir", "inbox", "--identity", "me.toml"]);
        let config = load_with_overrides(figment, &cli).unwrap();

        assert_eq!(config.host, "cli-host");
        assert_eq!(config.port, ClientConfig::default().port);
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.download_dir, PathBuf::from("inbox"));
        assert_eq!(config.identity_file, PathBuf::from("me.toml"));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let figment = defaults_only().merge(Toml::string("chunk_size = 0\n"));
        let cli = Cli::parse_from(["chatsec"]);
        assert!(load_with_overrides(figment, &cli).is_err());
    }
}
