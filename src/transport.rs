//! Transport abstraction
//!
//! The connection actor only sees [`FrameReader`] and [`FrameWriter`]. The
//! WebSocket adapter below maps tokio-tungstenite onto them and translates
//! library errors into [`TransportError`]. Control frames (ping/pong) are
//! handled inside the adapter; the reader only yields data frames.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace};

use crate::error::TransportError;

/// Receiving half of a connection
#[async_trait]
pub trait FrameReader: Send {
    /// Block until the next data frame arrives
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Sending half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Applies to every subsequent write until reset
    fn set_write_deadline(&mut self, deadline: Instant);

    async fn write_text_frame(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    async fn write_ping_frame(&mut self, data: Vec<u8>) -> Result<(), TransportError>;

    async fn write_close_frame(&mut self) -> Result<(), TransportError>;

    /// Flush and shut the connection down
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Split an upgraded WebSocket into its reader and writer halves
///
/// The reader fails with [`TransportError::ReadTimeout`] when nothing,
/// not even a pong, arrives within `pong_wait`.
pub fn split<S>(stream: WebSocketStream<S>, pong_wait: Duration) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (sink, stream) = stream.split();
    (
        WsReader { stream, pong_wait },
        WsWriter {
            sink,
            deadline: None,
        },
    )
}

pub struct WsReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
    pong_wait: Duration,
}

#[async_trait]
impl<S> FrameReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        loop {
            let next = timeout(self.pong_wait, self.stream.next())
                .await
                .map_err(|_| TransportError::ReadTimeout)?;

            match next {
                None => return Err(TransportError::ClosedAbnormally),
                Some(Err(err)) => return Err(translate_read_error(err)),
                Some(Ok(WsMessage::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(WsMessage::Binary(data))) => return Ok(data),
                Some(Ok(WsMessage::Close(frame))) => {
                    debug!(?frame, "received close frame");
                    return Err(match frame {
                        Some(frame) if matches!(frame.code, CloseCode::Normal | CloseCode::Away) => {
                            TransportError::ClosedNormally
                        }
                        _ => TransportError::ClosedAbnormally,
                    });
                }
                // Pongs to pings are queued by tungstenite itself
                Some(Ok(WsMessage::Ping(_))) => trace!("ping received"),
                Some(Ok(WsMessage::Pong(_))) => trace!("pong received"),
                Some(Ok(WsMessage::Frame(_))) => {}
            }
        }
    }
}

pub struct WsWriter<S> {
    sink: SplitSink<WebSocketStream<S>, WsMessage>,
    deadline: Option<Instant>,
}

impl<S> WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError> {
        let result = match self.deadline {
            Some(deadline) => timeout_at(deadline, self.sink.send(message))
                .await
                .map_err(|_| TransportError::WriteTimeout)?,
            None => self.sink.send(message).await,
        };
        result.map_err(translate_write_error)
    }
}

#[async_trait]
impl<S> FrameWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn set_write_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    async fn write_text_frame(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(data).map_err(|_| TransportError::WriteFailed)?;
        self.send(WsMessage::Text(text)).await
    }

    async fn write_ping_frame(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.send(WsMessage::Ping(data)).await
    }

    async fn write_close_frame(&mut self) -> Result<(), TransportError> {
        self.send(WsMessage::Close(None)).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let result = match self.deadline {
            Some(deadline) => timeout_at(deadline, self.sink.close())
                .await
                .map_err(|_| TransportError::WriteTimeout)?,
            None => self.sink.close().await,
        };
        result.map_err(translate_write_error)
    }
}

fn translate_read_error(err: WsError) -> TransportError {
    debug!(error = %err, "websocket read failed");
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ClosedNormally,
        WsError::Capacity(_) => TransportError::MessageTooLarge,
        WsError::Protocol(_) => TransportError::ClosedAbnormally,
        WsError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            TransportError::ClosedAbnormally
        }
        WsError::Io(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::ReadTimeout,
        _ => TransportError::Network,
    }
}

fn translate_write_error(err: WsError) -> TransportError {
    debug!(error = %err, "websocket write failed");
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::WriteAfterClose,
        WsError::Io(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::WriteTimeout,
        _ => TransportError::WriteFailed,
    }
}
