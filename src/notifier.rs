//! Broadcast fan-out
//!
//! Delivers one message to every room member's outbound mailbox. Delivery is
//! best effort and per recipient: a full or closed mailbox drops that copy
//! and the broadcast moves on. The caller is never blocked and never sees an
//! error.

use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::client::Mailbox;
use crate::error::RegistryError;
use crate::message::Message;
use crate::registry::ClientRegistry;
use crate::room::ChatRoom;
use crate::types::ClientId;

/// Sink for room-wide broadcasts
pub trait Notifier: Send + Sync + 'static {
    fn broadcast_to_room(&self, room: &ChatRoom, message: &Message);
}

/// Notifier backed by the client registry
#[derive(Debug, Clone)]
pub struct ClientNotifier {
    registry: ClientRegistry,
}

impl ClientNotifier {
    pub fn new(registry: ClientRegistry) -> Self {
        Self { registry }
    }

    /// Make a client's outbound mailbox reachable by broadcasts
    pub async fn register_client(&self, id: ClientId, mailbox: Mailbox) -> Result<(), RegistryError> {
        self.registry.register(id, mailbox).await
    }

    pub async fn unregister_client(&self, id: ClientId) -> Result<(), RegistryError> {
        self.registry.unregister(id).await
    }
}

impl Notifier for ClientNotifier {
    fn broadcast_to_room(&self, room: &ChatRoom, message: &Message) {
        let kind = message.kind();

        for member in room.get_clients() {
            let Some(mailbox) = self.registry.lookup(&member.id) else {
                // Disconnected but not yet out of the room
                debug!(client_id = %member.id, "attempted to broadcast to client that doesn't exist");
                continue;
            };

            match mailbox.try_send(message.clone()) {
                Ok(()) => debug!(client_id = %member.id, %kind, "message queued for client"),
                Err(TrySendError::Full(_)) => {
                    warn!(client_id = %member.id, %kind, "outbound mailbox is full, dropping message");
                }
                Err(TrySendError::Closed(_)) => {
                    warn!(client_id = %member.id, %kind, "outbound mailbox is closed, dropping message");
                }
            }
        }
    }
}
