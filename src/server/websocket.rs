//! WebSocket server implementation
//!
//! Provides a WebSocket server that listens on a configurable port and hands
//! each accepted connection to its own task.

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

use super::handler::{ChannelError, ConnectionError, ConnectionHandler, WS_PATH};
use crate::config::OriginPolicy;

/// Default port to listen on
pub const DEFAULT_PORT: u16 = 8081;

/// Default bind address (all interfaces)
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Configuration for the WebSocket server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind: String,
    /// Port to listen on
    pub port: u16,
    /// Which origins may upgrade
    pub origin_policy: OriginPolicy,
}

impl ServerConfig {
    /// Create a new server configuration
    pub fn new(bind: String, port: u16) -> Self {
        Self {
            bind,
            port,
            origin_policy: OriginPolicy::AllowAll,
        }
    }

    /// Set the origin policy
    pub fn with_origin_policy(mut self, origin_policy: OriginPolicy) -> Self {
        self.origin_policy = origin_policy;
        self
    }

    /// Get the socket address to bind to
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BIND.to_string(), DEFAULT_PORT)
    }
}

/// WebSocket server for editor client connections
pub struct WebSocketServer {
    config: ServerConfig,
    handler: ConnectionHandler,
    shutdown_tx: broadcast::Sender<()>,
}

impl WebSocketServer {
    /// Create a new WebSocket server
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = ConnectionHandler::new(config.origin_policy.clone());
        Self {
            config,
            handler,
            shutdown_tx,
        }
    }

    /// Trigger server shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Bind the configured address
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = self.config.socket_addr();
        info!("Starting server on {}", addr);
        TcpListener::bind(&addr).await
    }

    /// Run the WebSocket server
    ///
    /// Fails only if the configured address cannot be bound.
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown
    ///
    /// Every connection runs in its own task and shares nothing with the
    /// others. Tasks still running at shutdown end with the runtime.
    pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "WebSocket server listening on ws://{}{}",
            listener.local_addr()?,
            WS_PATH
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                // Accept new connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let handler = self.handler.clone();

                            tokio::spawn(async move {
                                match handler.handle(stream, peer_addr).await {
                                    ConnectionError::Channel(ChannelError::Closed) => {
                                        info!("Connection closed by {}", peer_addr);
                                    }
                                    e => {
                                        error!("Connection error from {}: {}", peer_addr, e);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                // Handle shutdown signal
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        Ok(())
    }
}
