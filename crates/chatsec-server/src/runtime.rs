//! Chat server runtime
//!
//! [`ChatServer`] binds the listener, generates the server key pair, builds the
//! shared state (registry, credential store, router, dispatcher) once and
//! hands it to a [`ConnectionHandler`] task per accepted socket.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatsec_core::{RsaEngine, ServerConfig};
//! use chatsec_server::ChatServer;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::default();
//! let engine = Arc::new(RsaEngine::new(config.key_bits));
//! let server = ChatServer::bind(config, engine).await?;
//! let shutdown = server.shutdown_handle();
//! tokio::spawn(async move {
//!     let _ = tokio::signal::ctrl_c().await;
//!     shutdown.shutdown();
//! });
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use chatsec_core::{CryptoEngine, KeyPair, PublicKey, ServerConfig, SessionId};

use crate::connection::ConnectionHandler;
use crate::error::{Result, ServerError};
use crate::logic::{CommandDispatcher, MessageRouter};
use crate::managers::{CredentialStore, SessionRegistry};

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// State shared by every connection task
pub struct ServerContext {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub router: MessageRouter,
    pub dispatcher: CommandDispatcher,
    pub engine: Arc<dyn CryptoEngine>,
    pub server_keys: Arc<KeyPair>,
}

/// Cloneable trigger stopping the accept loop and every connection
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn from_sender(tx: watch::Sender<bool>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

// ----------------------------------------------------------------------------
// Chat Server
// ----------------------------------------------------------------------------

/// Listener plus shared state of a running chat server
pub struct ChatServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
    shutdown: ShutdownHandle,
    next_session: u64,
}

impl ChatServer {
    /// Validate the configuration, create the server key pair and bind
    pub async fn bind(config: ServerConfig, engine: Arc<dyn CryptoEngine>) -> Result<Self> {
        config.validate()?;
        if engine.block_size() != config.challenge_size {
            return Err(ServerError::Config(format!(
                "Engine block size {} does not match challenge size {}",
                engine.block_size(),
                config.challenge_size
            )));
        }

        let server_keys = Arc::new(engine.generate_keypair()?);
        info!(fingerprint = %server_keys.public.fingerprint(), "Server key pair generated");

        let listener = TcpListener::bind(config.listen_address()).await?;
        info!(address = %listener.local_addr()?, max_sessions = config.max_sessions, "Chat server listening");

        let registry = Arc::new(SessionRegistry::new(
            config.max_sessions,
            CredentialStore::new(),
        ));
        let router = MessageRouter::new(Arc::clone(&registry));
        let dispatcher = CommandDispatcher::new(router.clone());
        let (tx, _rx) = watch::channel(false);

        Ok(Self {
            listener,
            context: Arc::new(ServerContext {
                config,
                registry,
                router,
                dispatcher,
                engine,
                server_keys,
            }),
            shutdown: ShutdownHandle::from_sender(tx),
            next_session: 0,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.context.registry)
    }

    pub fn router(&self) -> MessageRouter {
        self.context.router.clone()
    }

    pub fn server_public_key(&self) -> &PublicKey {
        &self.context.server_keys.public
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept connections until shutdown, then wait for every session to close
    pub async fn run(mut self) -> Result<()> {
        let mut shutdown = self.shutdown.tx.subscribe();
        let mut connections = JoinSet::new();
        if *shutdown.borrow_and_update() {
            return Ok(());
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.next_session += 1;
                        let session = SessionId::new(self.next_session);
                        debug!(session = %session, peer = %peer, "Accepted socket");

                        let handler = ConnectionHandler::new(Arc::clone(&self.context), session, peer);
                        connections.spawn(handler.run(stream, self.shutdown.tx.subscribe()));
                    }
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        info!(sessions = connections.len(), "Chat server shutting down");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}
