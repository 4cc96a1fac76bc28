//! Single-room WebSocket chat relay library
//!
//! Clients connect over WebSocket, send chat lines and receive a fan-out of
//! every message and every join/leave in the room.
//!
//! # Architecture
//! - `message`: `{"type", "data"}` envelope codec over a closed `Message` enum
//! - `client`: per-connection actor with a read loop and a write loop
//!   (keepalive pings, write deadlines, close frames)
//! - `registry`: client id -> outbound mailbox, mutated by a single worker task
//! - `room`: membership of the one room
//! - `notifier`: best-effort, non-blocking broadcast to every member's mailbox
//! - `service`: serializes membership events and chat lines into two FIFO
//!   queues and drives the notifier
//!
//! Every loop observes one server-wide `CancellationToken`.
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use room_relay::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), room_relay::AppError> {
//!     let config = ServerConfig::default();
//!     let listener = TcpListener::bind(&config.addr).await?;
//!     let shutdown = CancellationToken::new();
//!
//!     ChatServer::new(config)?.run(listener, shutdown).await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod message;
pub mod notifier;
pub mod registry;
pub mod room;
pub mod server;
pub mod service;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{Client, ClientTasks, ConnectionState, Mailbox};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ClientConfig, RelayArgs, ServerConfig};
pub use error::{AppError, CodecError, ConfigError, RegistryError, RoomError, TransportError};
pub use event::{ApplicationEvent, UserJoinedRoom, UserLeftRoom};
pub use handler::handle_connection;
pub use message::{decode, encode, ChatMessage, Message, MessageKind, UserJoined, UserLeft};
pub use notifier::{ClientNotifier, Notifier};
pub use registry::{ClientRegistry, RegistryWorker};
pub use room::ChatRoom;
pub use server::ChatServer;
pub use service::{ChatService, ChatServiceWorker, ServiceTasks};
pub use transport::{FrameReader, FrameWriter};
pub use types::{ClientDescriptor, ClientId};
