//! chatsec-server entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info};

use chatsec_core::RsaEngine;
use chatsec_server::{config, ChatServer, Cli, ServerConsole};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = config::load(&cli).context("Failed to load configuration")?;
    if cli.print_config {
        print!("{}", config::example_config(&config)?);
        return Ok(());
    }

    let engine = Arc::new(RsaEngine::new(config.key_bits));
    let server = ChatServer::bind(config, engine)
        .await
        .context("Failed to start chat server")?;
    let shutdown = server.shutdown_handle();

    if !cli.no_console {
        let console = ServerConsole::new(server.registry(), server.router(), shutdown.clone());
        tokio::spawn(console.run(BufReader::new(tokio::io::stdin())));
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received"),
            Err(e) => error!("Failed to listen for interrupt: {}", e),
        }
        signal.shutdown();
    });

    server.run().await?;
    info!("Chat server stopped");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
