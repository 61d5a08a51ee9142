//! Completion Bridge Server
//!
//! Accepts completion requests from editor frontends over WebSocket and
//! answers each one with a canned completion.

mod config;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use config::{FileConfig, OriginPolicy};
use server::{ServerConfig, WebSocketServer, DEFAULT_BIND, DEFAULT_PORT};

/// Completion Bridge Server
///
/// Answers editor completion requests over WebSocket
#[derive(Parser, Debug)]
#[command(name = "completion-bridge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Port to listen on [default: 8081]
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    bind: Option<String>,

    /// Origin allowed to connect (repeatable); all origins are accepted when none is given
    #[arg(long = "allow-origin", value_name = "ORIGIN")]
    allow_origins: Vec<String>,

    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Merge flags over the config file; flags win, then the file, then defaults
    fn server_config(&self, file: FileConfig) -> ServerConfig {
        let bind = self
            .bind
            .clone()
            .or(file.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let port = self.port.or(file.port).unwrap_or(DEFAULT_PORT);
        let origin_policy = if self.allow_origins.is_empty() {
            file.origin_policy()
        } else {
            OriginPolicy::from_origins(self.allow_origins.iter().cloned())
        };

        ServerConfig::new(bind, port).with_origin_policy(origin_policy)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Completion Bridge v{}", env!("CARGO_PKG_VERSION"));

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = args.server_config(file);

    match &config.origin_policy {
        OriginPolicy::AllowAll => info!("Accepting connections from any origin"),
        OriginPolicy::AllowList(origins) => {
            info!("Accepting connections from {} allowed origins", origins.len())
        }
    }

    // Create and start the WebSocket server
    let server = Arc::new(WebSocketServer::new(config));
    let server_handle = Arc::clone(&server);

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        shutdown_signal().await;
        server_handle.shutdown();
    });

    // Run the server
    server.run().await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
