//! chatsec - terminal client entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chatsec_cli::{config, ChatClient, Cli, CliError, ClientEvent, ClientIdentity, UserInput};
use chatsec_core::protocol::wire::NAME_PROMPT;
use chatsec_core::{ClientCommand, CryptoEngine, RsaEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = config::load(&cli).context("Failed to load configuration")?;
    if cli.print_config {
        print!("{}", config::example_config(&config)?);
        return Ok(());
    }

    let engine: Arc<dyn CryptoEngine> = Arc::new(RsaEngine::new(config.key_bits));
    let identity = ClientIdentity::load_or_generate(&config.identity_file, engine.as_ref())
        .context("Failed to prepare the client identity")?;
    let mut client = ChatClient::connect_with_config(&config, engine, identity)
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_address()))?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    // Login, asking again for refused names
    let mut requested = cli.name.clone();
    loop {
        let name = match requested.take() {
            Some(name) => name,
            None => {
                println!("{}", NAME_PROMPT);
                match stdin.next_line().await? {
                    Some(line) => line.trim().to_string(),
                    None => return Ok(()),
                }
            }
        };

        match client.login(&name).await {
            Ok(()) => break,
            Err(CliError::Refused(reason)) => println!("{}", reason),
            Err(CliError::AuthenticationFailed) => println!("Authentication failed"),
            Err(e @ CliError::UnknownServerKey) => println!("{}", e),
            Err(e) => return Err(e.into()),
        }
    }

    // Keep the server key learned during login for the next run
    if let Err(e) = client.identity().save_to_file(&config.identity_file) {
        warn!("{}", e);
    }

    let (mut reader, mut writer, _identity) = client.into_split();
    let (events_tx, mut events) = mpsc::channel(64);
    tokio::spawn(async move {
        loop {
            match reader.next_event().await {
                Ok(Some(event)) => {
                    if events_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Connection error: {}", e);
                    break;
                }
            }
        }
    });

    let mut quitting = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => {
                    if !quitting {
                        println!("Connection closed by server");
                    }
                    break;
                }
            },
            line = stdin.next_line(), if !quitting => {
                let Some(line) = line? else {
                    writer.send_command(&ClientCommand::Quit).await?;
                    quitting = true;
                    continue;
                };

                match UserInput::parse(&line) {
                    Ok(UserInput::Empty) => {}
                    Ok(UserInput::Quit) => {
                        writer.send_command(&ClientCommand::Quit).await?;
                        quitting = true;
                    }
                    Ok(UserInput::SendFile { target, path }) => {
                        match writer.send_file(&target, &path).await {
                            Ok(bytes) => println!("Sent {} ({} bytes) to {}", path.display(), bytes, target),
                            Err(e @ CliError::FileRead { .. }) => println!("{}", e),
                            Err(e) => return Err(e.into()),
                        }
                    }
                    Ok(UserInput::Send(body)) => {
                        let sequence = writer.send(&body).await?;
                        debug!(sequence, "Line sent");
                    }
                    Err(e) => println!("{}", e),
                }
            }
        }
    }

    Ok(())
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Message(message) => println!("{}", message),
        ClientEvent::TransferStarted { sender, filename } => {
            println!("Receiving {} from {}", filename, sender)
        }
        ClientEvent::TransferComplete(done) => match &done.location {
            Some(path) => println!(
                "Received {} from {} ({} bytes, sha256 {}) -> {}",
                done.filename,
                done.sender,
                done.bytes,
                done.digest,
                path.display()
            ),
            None => println!(
                "Received {} from {} ({} bytes, sha256 {})",
                done.filename, done.sender, done.bytes, done.digest
            ),
        },
        ClientEvent::TransferFailed { sender, error } => {
            println!("Transfer from {} failed: {}", sender, error)
        }
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
