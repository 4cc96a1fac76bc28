//! Single-room WebSocket chat relay - Entry Point
//!
//! Starts the TCP listener and the ChatServer, and shuts everything down on
//! Ctrl-C.

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use room_relay::handler::CHAT_PATH;
use room_relay::{AppError, ChatServer, RelayArgs};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=room_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("room_relay=info")),
        )
        .init();

    // Flags fall back to RELAY_* environment variables
    let config = RelayArgs::parse().into_config()?;

    // Start TCP listener
    let listener = TcpListener::bind(&config.addr).await?;
    info!(
        "WebSocket Chat Relay listening on ws://{}{}?name=<name>",
        config.addr, CHAT_PATH
    );

    let shutdown = CancellationToken::new();
    let server = ChatServer::new(config)?;
    let server_task = tokio::spawn(server.run(listener, shutdown.clone()));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    info!("Received Ctrl-C, shutting down");
    shutdown.cancel();

    if let Err(e) = server_task.await {
        error!("Server task failed: {}", e);
    }
    info!("Server stopped");

    Ok(())
}
