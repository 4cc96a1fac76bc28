//! ChatServer
//!
//! Constructs one instance of every collaborator (room, registry, notifier,
//! chat service), then accepts connections until shutdown. Nothing here is
//! global: everything is owned by the server value and handed to the
//! connection handlers by clone.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::ConfigError;
use crate::handler::{handle_connection, ConnectionContext};
use crate::notifier::ClientNotifier;
use crate::registry::{ClientRegistry, RegistryWorker};
use crate::room::ChatRoom;
use crate::service::{ChatService, ChatServiceWorker};

/// The relay for a single room
pub struct ChatServer {
    config: ServerConfig,
    room: Arc<ChatRoom>,
    notifier: ClientNotifier,
    service: ChatService<ClientNotifier>,
    registry_worker: RegistryWorker,
    service_worker: ChatServiceWorker<ClientNotifier>,
}

impl ChatServer {
    /// Create a server stamping messages with the wall clock
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Fails before creating any channel when `config` is unusable
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;

        let room = Arc::new(ChatRoom::new(config.room_id.clone(), config.room_name.clone()));
        let (registry, registry_worker) = ClientRegistry::new(config.registry_capacity);
        let notifier = ClientNotifier::new(registry);
        let (service, service_worker) = ChatService::new(
            Arc::clone(&room),
            Arc::new(notifier.clone()),
            clock,
            config.events_capacity,
            config.messages_capacity,
        );

        Ok(Self {
            config,
            room,
            notifier,
            service,
            registry_worker,
            service_worker,
        })
    }

    pub fn room(&self) -> Arc<ChatRoom> {
        Arc::clone(&self.room)
    }

    /// Run the accept loop until `shutdown` is cancelled
    ///
    /// The same token stops the registry worker, the chat service loops and
    /// every connection.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) {
        let ChatServer {
            config,
            room,
            notifier,
            service,
            registry_worker,
            service_worker,
        } = self;

        tokio::spawn(registry_worker.run(shutdown.clone()));
        service_worker.spawn(shutdown.clone());

        let ctx = ConnectionContext {
            service,
            notifier,
            config: config.client,
            shutdown: shutdown.clone(),
        };

        info!(room = %room.name(), "ChatServer started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        let ctx = ctx.clone();

                        // Spawn handler task for each connection
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, ctx).await {
                                error!("Connection handler error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("ChatServer shutting down");
    }
}
