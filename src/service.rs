//! Chat service
//!
//! The single source of ordering truth for one room. Membership changes and
//! chat lines are enqueued onto two bounded queues, each drained by its own
//! consumer task. Each queue is FIFO; the two are not ordered relative to
//! each other. Producers never block: when a queue is full the item is
//! dropped and logged.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::event::ApplicationEvent;
use crate::message::Message;
use crate::notifier::Notifier;
use crate::room::ChatRoom;
use crate::types::ClientId;

/// A chat line waiting for its timestamp
#[derive(Debug)]
struct PendingMessage {
    from: String,
    text: String,
}

struct Shared<N> {
    room: Arc<ChatRoom>,
    notifier: Arc<N>,
    clock: Arc<dyn Clock>,
}

/// Producer side of the service. Cheap to clone.
pub struct ChatService<N> {
    shared: Arc<Shared<N>>,
    events: mpsc::Sender<ApplicationEvent>,
    messages: mpsc::Sender<PendingMessage>,
}

impl<N> Clone for ChatService<N> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            messages: self.messages.clone(),
        }
    }
}

/// Consumer side of the service, spawned once
pub struct ChatServiceWorker<N> {
    shared: Arc<Shared<N>>,
    events: mpsc::Receiver<ApplicationEvent>,
    messages: mpsc::Receiver<PendingMessage>,
}

/// Handles to the two consumer loops
pub struct ServiceTasks {
    pub events: JoinHandle<()>,
    pub messages: JoinHandle<()>,
}

impl<N: Notifier> ChatService<N> {
    pub fn new(
        room: Arc<ChatRoom>,
        notifier: Arc<N>,
        clock: Arc<dyn Clock>,
        events_capacity: usize,
        messages_capacity: usize,
    ) -> (Self, ChatServiceWorker<N>) {
        let shared = Arc::new(Shared {
            room,
            notifier,
            clock,
        });
        let (events_tx, events_rx) = mpsc::channel(events_capacity);
        let (messages_tx, messages_rx) = mpsc::channel(messages_capacity);

        (
            Self {
                shared: Arc::clone(&shared),
                events: events_tx,
                messages: messages_tx,
            },
            ChatServiceWorker {
                shared,
                events: events_rx,
                messages: messages_rx,
            },
        )
    }

    pub fn room(&self) -> &Arc<ChatRoom> {
        &self.shared.room
    }

    /// Let a client in and schedule its `user_joined` broadcast
    pub fn enter_room(&self, id: ClientId, name: String) {
        info!(client_id = %id, name = %name, "client entering room");
        let event = self.shared.room.let_client_in(id, name);
        self.enqueue_event(event.into());
    }

    /// Let a client out and schedule its `user_left` broadcast
    ///
    /// A client that is not in the room produces no event.
    pub fn leave_room(&self, id: &ClientId) {
        match self.shared.room.let_client_out(id) {
            Ok(event) => {
                info!(client_id = %id, name = %event.name, "client leaving room");
                self.enqueue_event(event.into());
            }
            Err(err) => warn!(client_id = %id, error = %err, "ignoring leave"),
        }
    }

    /// Schedule a chat line from `id`
    ///
    /// The author name is resolved from room membership now; non-members
    /// are dropped.
    pub fn send_message(&self, id: &ClientId, text: String) {
        let Some(from) = self.shared.room.client_name(id) else {
            warn!(client_id = %id, "message from a client outside the room, dropping");
            return;
        };

        match self.messages.try_send(PendingMessage { from, text }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(client_id = %id, "message queue full, dropping message"),
            Err(TrySendError::Closed(_)) => debug!(client_id = %id, "chat service stopped, dropping message"),
        }
    }

    fn enqueue_event(&self, event: ApplicationEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => warn!(?event, "event queue full, dropping event"),
            Err(TrySendError::Closed(event)) => debug!(?event, "chat service stopped, dropping event"),
        }
    }
}

impl<N: Notifier> ChatServiceWorker<N> {
    /// Spawn both consumer loops
    pub fn spawn(self, cancel: CancellationToken) -> ServiceTasks {
        let ChatServiceWorker {
            shared,
            events,
            messages,
        } = self;

        ServiceTasks {
            events: tokio::spawn(handle_events(Arc::clone(&shared), events, cancel.clone())),
            messages: tokio::spawn(handle_messages(shared, messages, cancel)),
        }
    }
}

async fn handle_events<N: Notifier>(
    shared: Arc<Shared<N>>,
    mut events: mpsc::Receiver<ApplicationEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let timestamp = shared.clock.now();
        let message = match event {
            ApplicationEvent::UserJoinedRoom(e) => Message::user_joined(e.name, timestamp),
            ApplicationEvent::UserLeftRoom(e) => Message::user_left(e.name, timestamp),
        };
        shared.notifier.broadcast_to_room(&shared.room, &message);
    }

    info!("event handler done, exiting");
}

async fn handle_messages<N: Notifier>(
    shared: Arc<Shared<N>>,
    mut messages: mpsc::Receiver<PendingMessage>,
    cancel: CancellationToken,
) {
    loop {
        let pending = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            pending = messages.recv() => match pending {
                Some(pending) => pending,
                None => break,
            },
        };

        let message = Message::chat(pending.from, pending.text, shared.clock.now());
        shared.notifier.broadcast_to_room(&shared.room, &message);
    }

    info!("message handler done, exiting");
}
