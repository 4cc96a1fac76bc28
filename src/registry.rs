//! Client registry
//!
//! Maps client ids to their live outbound mailbox. Mutations go through a
//! single worker task fed by a bounded request queue; lookups take a shared
//! read lock and never wait on the worker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::client::Mailbox;
use crate::error::RegistryError;
use crate::types::ClientId;

type Clients = Arc<RwLock<HashMap<ClientId, Mailbox>>>;

/// Requests processed by the registry worker
#[derive(Debug)]
enum RegistryRequest {
    Register {
        id: ClientId,
        mailbox: Mailbox,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Unregister {
        id: ClientId,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
}

/// Cloneable handle to the registry
#[derive(Debug, Clone)]
pub struct ClientRegistry {
    clients: Clients,
    requests: mpsc::Sender<RegistryRequest>,
}

/// The single writer. Must be spawned for register/unregister to complete.
pub struct RegistryWorker {
    clients: Clients,
    requests: mpsc::Receiver<RegistryRequest>,
}

impl ClientRegistry {
    /// Create a registry with a request queue of `capacity`
    pub fn new(capacity: usize) -> (Self, RegistryWorker) {
        let clients: Clients = Arc::new(RwLock::new(HashMap::new()));
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                clients: Arc::clone(&clients),
                requests: tx,
            },
            RegistryWorker {
                clients,
                requests: rx,
            },
        )
    }

    /// Add a client. A duplicate id is rejected; the first registration wins.
    pub async fn register(&self, id: ClientId, mailbox: Mailbox) -> Result<(), RegistryError> {
        let (reply, response) = oneshot::channel();
        self.request(RegistryRequest::Register { id, mailbox, reply }, response)
            .await
    }

    /// Remove a client. Unknown ids are reported, not fatal.
    pub async fn unregister(&self, id: ClientId) -> Result<(), RegistryError> {
        let (reply, response) = oneshot::channel();
        self.request(RegistryRequest::Unregister { id, reply }, response)
            .await
    }

    async fn request(
        &self,
        request: RegistryRequest,
        response: oneshot::Receiver<Result<(), RegistryError>>,
    ) -> Result<(), RegistryError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| RegistryError::Closed)?;
        response.await.map_err(|_| RegistryError::Closed)?
    }

    /// Live mailbox for `id`, if registered
    pub fn lookup(&self, id: &ClientId) -> Option<Mailbox> {
        self.read().get(id).cloned()
    }

    /// Ids of every registered client
    pub fn list(&self) -> Vec<ClientId> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ClientId, Mailbox>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RegistryWorker {
    /// Process requests until cancelled or every handle is dropped
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("client registry started");

        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = self.requests.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            self.handle_request(request);
        }

        info!("client registry shutting down");
    }

    fn handle_request(&self, request: RegistryRequest) {
        match request {
            RegistryRequest::Register { id, mailbox, reply } => {
                let _ = reply.send(self.register(id, mailbox));
            }
            RegistryRequest::Unregister { id, reply } => {
                let _ = reply.send(self.unregister(id));
            }
        }
    }

    fn register(&self, id: ClientId, mailbox: Mailbox) -> Result<(), RegistryError> {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);

        if clients.contains_key(&id) {
            error!(client_id = %id, "client already exists, skipping adding");
            return Err(RegistryError::AlreadyRegistered(id));
        }

        debug!(client_id = %id, "client registered");
        clients.insert(id, mailbox);
        debug!("Total registered clients: {}", clients.len());
        Ok(())
    }

    fn unregister(&self, id: ClientId) -> Result<(), RegistryError> {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);

        if clients.remove(&id).is_none() {
            error!(client_id = %id, "client doesn't exist, skipping unregistering");
            return Err(RegistryError::NotRegistered(id));
        }

        debug!(client_id = %id, "client unregistered");
        debug!("Total registered clients: {}", clients.len());
        Ok(())
    }
}
