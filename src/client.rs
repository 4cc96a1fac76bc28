//! Connection actor
//!
//! Owns one transport connection and drives it with two independent tasks:
//! - the read loop decodes frames and hands them to the inbound mailbox
//! - the write loop drains the outbound mailbox, sends keepalive pings and
//!   writes the close frame on shutdown
//!
//! The loops share nothing but the mailboxes, the cancellation tokens and the
//! published [`ConnectionState`]. When the write loop ends, for any reason,
//! it stops the read loop too, so a connection that can no longer be written
//! to is torn down like one that can no longer be read.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::message::{self, Message};
use crate::transport::{FrameReader, FrameWriter};
use crate::types::ClientId;

/// Outbound mailbox handle, as stored in the registry
pub type Mailbox = mpsc::Sender<Message>;

/// Lifecycle of one connection. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// A connected client and its transport halves
pub struct Client<R, W> {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Display name supplied at connect time
    pub name: String,
    reader: R,
    writer: W,
    /// Decoded messages toward the chat service
    inbound: mpsc::Sender<Message>,
    /// Messages awaiting transmission
    outbound: mpsc::Receiver<Message>,
    config: ClientConfig,
    state: Arc<watch::Sender<ConnectionState>>,
}

/// Handles to a started client's loops
pub struct ClientTasks {
    /// Resolves with the transport error that ended the read loop, or
    /// `None` when it was cancelled
    pub read: JoinHandle<Option<TransportError>>,
    pub write: JoinHandle<()>,
    state: watch::Receiver<ConnectionState>,
}

impl ClientTasks {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl<R, W> Client<R, W>
where
    R: FrameReader + 'static,
    W: FrameWriter + 'static,
{
    /// Create a new client over an established transport
    pub fn new(
        id: ClientId,
        name: String,
        reader: R,
        writer: W,
        inbound: mpsc::Sender<Message>,
        outbound: mpsc::Receiver<Message>,
        config: ClientConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id,
            name,
            reader,
            writer,
            inbound,
            outbound,
            config,
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Spawn the read and write loops
    ///
    /// Cancelling `cancel` makes the write loop send a close frame and the
    /// read loop stop waiting for frames. The state becomes `Active` once
    /// both loops are spawned.
    pub fn start(self, cancel: CancellationToken) -> ClientTasks {
        let Client {
            id,
            name,
            reader,
            writer,
            inbound,
            outbound,
            config,
            state,
        } = self;

        let watcher = state.subscribe();
        debug!(client_id = %id, name = %name, "starting client loops");

        let reading = cancel.child_token();
        let read = tokio::spawn(read_messages(
            id.clone(),
            reader,
            inbound,
            config.receive_timeout,
            reading.clone(),
            Arc::clone(&state),
        ));
        let write = tokio::spawn(write_messages(
            id,
            writer,
            outbound,
            config.write_wait,
            config.ping_period,
            cancel,
            reading,
            Arc::clone(&state),
        ));
        advance(&state, ConnectionState::Active);

        ClientTasks {
            read,
            write,
            state: watcher,
        }
    }
}

fn advance(state: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state.send_if_modified(|current| {
        if next > *current {
            *current = next;
            true
        } else {
            false
        }
    });
}

async fn read_messages<R: FrameReader>(
    id: ClientId,
    mut reader: R,
    inbound: mpsc::Sender<Message>,
    receive_timeout: Duration,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
) -> Option<TransportError> {
    let outcome = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client_id = %id, "cancelling read loop");
                break None;
            }
            frame = reader.read_frame() => frame,
        };

        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(TransportError::ClosedNormally) => {
                info!(client_id = %id, "connection closed by peer");
                break Some(TransportError::ClosedNormally);
            }
            Err(err) => {
                warn!(client_id = %id, error = %err, "could not read the message");
                break Some(err);
            }
        };

        let message = match message::decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                warn!(client_id = %id, error = %err, "failed to decode the message, skipping");
                continue;
            }
        };

        let kind = message.kind();
        match inbound.send_timeout(message, receive_timeout).await {
            Ok(()) => debug!(client_id = %id, %kind, "message received"),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(client_id = %id, %kind, "inbound mailbox is full, dropping message");
            }
            Err(SendTimeoutError::Closed(_)) => {
                debug!(client_id = %id, %kind, "inbound mailbox closed, dropping message");
            }
        }
    };

    advance(&state, ConnectionState::Closing);
    debug!(client_id = %id, "read loop ended");
    outcome
}

/// Why the write loop stopped
enum WriteExit {
    /// Orderly shutdown, the peer should get a close frame
    SendClose,
    /// The transport already failed
    Failed,
}

async fn write_messages<W: FrameWriter>(
    id: ClientId,
    mut writer: W,
    mut outbound: mpsc::Receiver<Message>,
    write_wait: Duration,
    ping_period: Duration,
    cancel: CancellationToken,
    reading: CancellationToken,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(client_id = %id, "write loop cancelled");
                break WriteExit::SendClose;
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    debug!(client_id = %id, "outbound mailbox closed, sending close frame");
                    break WriteExit::SendClose;
                };

                let data = match message::encode(&message) {
                    Ok(data) => data,
                    Err(err) => {
                        error!(client_id = %id, error = %err, "failed to encode a message");
                        continue;
                    }
                };

                writer.set_write_deadline(Instant::now() + write_wait);
                if let Err(err) = writer.write_text_frame(data).await {
                    warn!(client_id = %id, error = %err, "failed to write message");
                    break WriteExit::Failed;
                }
                debug!(client_id = %id, kind = %message.kind(), "message sent");
            }
            _ = ticker.tick() => {
                writer.set_write_deadline(Instant::now() + write_wait);
                if let Err(err) = writer.write_ping_frame(Vec::new()).await {
                    warn!(client_id = %id, error = %err, "failed to write ping message");
                    break WriteExit::Failed;
                }
            }
        }
    };

    advance(&state, ConnectionState::Closing);
    if let WriteExit::Failed = exit {
        info!(client_id = %id, "write failed, stopping read loop");
    }
    reading.cancel();

    if let WriteExit::SendClose = exit {
        writer.set_write_deadline(Instant::now() + write_wait);
        if let Err(err) = writer.write_close_frame().await {
            debug!(client_id = %id, error = %err, "failed to write close message");
        }
    }
    if let Err(err) = writer.close().await {
        debug!(client_id = %id, error = %err, "failed to close connection");
    }

    advance(&state, ConnectionState::Closed);
    debug!(client_id = %id, "write loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::time::timeout;

    /// In-memory reader fed by the test
    struct ScriptedReader {
        frames: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
    }

    #[async_trait]
    impl FrameReader for ScriptedReader {
        async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
            match self.frames.recv().await {
                Some(frame) => frame,
                None => Err(TransportError::ClosedNormally),
            }
        }
    }

    #[derive(Debug, PartialEq)]
    enum Written {
        Text(Vec<u8>),
        Ping,
        Close,
        Closed,
    }

    /// Which writes a `RecordingWriter` fails
    #[derive(Clone, Copy, PartialEq)]
    enum Fault {
        Pings,
        Texts,
    }

    /// In-memory writer that records every frame
    struct RecordingWriter {
        written: mpsc::UnboundedSender<Written>,
        fault: Option<Fault>,
    }

    #[async_trait]
    impl FrameWriter for RecordingWriter {
        fn set_write_deadline(&mut self, _deadline: Instant) {}

        async fn write_text_frame(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
            if self.fault == Some(Fault::Texts) {
                return Err(TransportError::WriteFailed);
            }
            let _ = self.written.send(Written::Text(data));
            Ok(())
        }

        async fn write_ping_frame(&mut self, _data: Vec<u8>) -> Result<(), TransportError> {
            if self.fault == Some(Fault::Pings) {
                return Err(TransportError::WriteTimeout);
            }
            let _ = self.written.send(Written::Ping);
            Ok(())
        }

        async fn write_close_frame(&mut self) -> Result<(), TransportError> {
            let _ = self.written.send(Written::Close);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            let _ = self.written.send(Written::Closed);
            Ok(())
        }
    }

    struct Harness {
        frames: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
        written: mpsc::UnboundedReceiver<Written>,
        inbound: mpsc::Receiver<Message>,
        outbound: Mailbox,
        client: Client<ScriptedReader, RecordingWriter>,
    }

    fn harness(config: ClientConfig, fault: Option<Fault>) -> Harness {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.recv_capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(config.send_capacity);

        let client = Client::new(
            ClientId::from("1"),
            "Jane".to_string(),
            ScriptedReader { frames: frames_rx },
            RecordingWriter {
                written: written_tx,
                fault,
            },
            inbound_tx,
            outbound_rx,
            config,
        );

        Harness {
            frames: frames_tx,
            written: written_rx,
            inbound: inbound_rx,
            outbound: outbound_tx,
            client,
        }
    }

    fn chat(text: &str) -> Message {
        Message::chat("Jane", text, Utc.with_ymd_and_hms(2025, 12, 7, 0, 0, 0).unwrap())
    }

    async fn next_written(written: &mut mpsc::UnboundedReceiver<Written>) -> Written {
        timeout(Duration::from_secs(1), written.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("writer dropped")
    }

    #[tokio::test]
    async fn test_read_loop_forwards_and_skips_bad_frames() {
        let mut h = harness(ClientConfig::default(), None);
        assert_eq!(h.client.state(), ConnectionState::Connecting);
        let tasks = h.client.start(CancellationToken::new());
        assert_eq!(tasks.state(), ConnectionState::Active);

        h.frames.send(Ok(b"garbage".to_vec())).unwrap();
        h.frames
            .send(Ok(br#"{"type":"nope","data":{}}"#.to_vec()))
            .unwrap();
        h.frames
            .send(Ok(message::encode(&chat("hi")).unwrap()))
            .unwrap();
        h.frames.send(Err(TransportError::ClosedAbnormally)).unwrap();

        let outcome = timeout(Duration::from_secs(1), tasks.read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Some(TransportError::ClosedAbnormally));

        assert_eq!(h.inbound.recv().await, Some(chat("hi")));
        assert!(h.inbound.try_recv().is_err());
        assert!(*tasks.state.borrow() >= ConnectionState::Closing);
    }

    #[tokio::test]
    async fn test_read_loop_drops_when_inbound_full() {
        let config = ClientConfig {
            recv_capacity: 1,
            receive_timeout: Duration::from_millis(20),
            ..ClientConfig::default()
        };
        let mut h = harness(config, None);
        let tasks = h.client.start(CancellationToken::new());

        h.frames
            .send(Ok(message::encode(&chat("first")).unwrap()))
            .unwrap();
        h.frames
            .send(Ok(message::encode(&chat("second")).unwrap()))
            .unwrap();
        h.frames.send(Err(TransportError::ClosedNormally)).unwrap();

        let outcome = timeout(Duration::from_secs(1), tasks.read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Some(TransportError::ClosedNormally));

        assert_eq!(h.inbound.recv().await, Some(chat("first")));
        assert!(h.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_loop_sends_text_frames() {
        let mut h = harness(ClientConfig::default(), None);
        let _tasks = h.client.start(CancellationToken::new());

        h.outbound.send(chat("one")).await.unwrap();
        h.outbound.send(chat("two")).await.unwrap();

        for expected in ["one", "two"] {
            match next_written(&mut h.written).await {
                Written::Text(data) => assert_eq!(message::decode(&data).unwrap(), chat(expected)),
                other => panic!("expected text frame, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_cancel_writes_close_frame() {
        let mut h = harness(ClientConfig::default(), None);
        let cancel = CancellationToken::new();
        let tasks = h.client.start(cancel.clone());
        let mut state = tasks.watch_state();

        cancel.cancel();

        assert_eq!(next_written(&mut h.written).await, Written::Close);
        assert_eq!(next_written(&mut h.written).await, Written::Closed);

        let outcome = timeout(Duration::from_secs(1), tasks.read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, None);

        timeout(Duration::from_secs(1), tasks.write)
            .await
            .unwrap()
            .unwrap();
        timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Closed),
        )
        .await
        .unwrap()
        .unwrap();
    }

    #[tokio::test]
    async fn test_closed_outbound_mailbox_writes_close_frame() {
        let mut h = harness(ClientConfig::default(), None);
        let tasks = h.client.start(CancellationToken::new());

        drop(h.outbound);

        assert_eq!(next_written(&mut h.written).await, Written::Close);
        assert_eq!(next_written(&mut h.written).await, Written::Closed);
        timeout(Duration::from_secs(1), tasks.write)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_keepalive_pings() {
        let config = ClientConfig {
            ping_period: Duration::from_millis(20),
            ..ClientConfig::default()
        };
        let mut h = harness(config, None);
        let _tasks = h.client.start(CancellationToken::new());

        assert_eq!(next_written(&mut h.written).await, Written::Ping);
        assert_eq!(next_written(&mut h.written).await, Written::Ping);
    }

    #[tokio::test]
    async fn test_ping_failure_ends_write_loop() {
        let config = ClientConfig {
            ping_period: Duration::from_millis(20),
            ..ClientConfig::default()
        };
        let mut h = harness(config, Some(Fault::Pings));
        let tasks = h.client.start(CancellationToken::new());

        timeout(Duration::from_secs(1), tasks.write)
            .await
            .unwrap()
            .unwrap();

        // No close frame after a transport failure, only the close call
        assert_eq!(next_written(&mut h.written).await, Written::Closed);
        assert_eq!(*tasks.state.borrow(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_write_failure_stops_read_loop() {
        let config = ClientConfig {
            ping_period: Duration::from_millis(20),
            ..ClientConfig::default()
        };
        let mut h = harness(config, Some(Fault::Pings));
        let tasks = h.client.start(CancellationToken::new());

        timeout(Duration::from_secs(1), tasks.write)
            .await
            .unwrap()
            .unwrap();
        let outcome = timeout(Duration::from_secs(1), tasks.read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, None);

        // The reader is gone, so a late chat line never reaches the room
        assert!(h
            .frames
            .send(Ok(message::encode(&chat("still forwarded")).unwrap()))
            .is_err());
        assert_eq!(h.inbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_text_failure_ends_both_loops() {
        let mut h = harness(ClientConfig::default(), Some(Fault::Texts));
        let tasks = h.client.start(CancellationToken::new());

        h.outbound.send(chat("lost")).await.unwrap();

        timeout(Duration::from_secs(1), tasks.write)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(next_written(&mut h.written).await, Written::Closed);
        assert_eq!(*tasks.state.borrow(), ConnectionState::Closed);

        let outcome = timeout(Duration::from_secs(1), tasks.read)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, None);
    }
}
