//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, mailbox
//! setup, registration, inbound forwarding and teardown once the read loop
//! ends.

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::config::ClientConfig;
use crate::error::AppError;
use crate::message::Message;
use crate::notifier::{ClientNotifier, Notifier};
use crate::service::ChatService;
use crate::transport;
use crate::types::ClientId;

/// Path clients connect to
pub const CHAT_PATH: &str = "/chat";

/// Everything a connection needs from the server
#[derive(Clone)]
pub struct ConnectionContext {
    pub service: ChatService<ClientNotifier>,
    pub notifier: ClientNotifier,
    pub config: ClientConfig,
    /// Server-wide token; each connection runs under a child of it
    pub shutdown: CancellationToken,
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, then runs the client until its read
/// loop ends.
pub async fn handle_connection(stream: TcpStream, ctx: ConnectionContext) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, the display name comes from `?name=`
    let mut requested_name = None;
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        if request.uri().path() != CHAT_PATH {
            return Err(reject(StatusCode::NOT_FOUND, "unknown path"));
        }
        requested_name = client_name(request.uri());
        match requested_name {
            Some(_) => Ok(response),
            None => Err(reject(StatusCode::BAD_REQUEST, "client name not provided")),
        }
    })
    .await?;
    let name = requested_name.ok_or(AppError::MissingName)?;

    let client_id = ClientId::generate();
    info!(client_id = %client_id, name = %name, "Client connected from {}", peer_addr);

    let (reader, writer) = transport::split(ws_stream, ctx.config.pong_wait);
    let (inbound_tx, inbound_rx) = mpsc::channel(ctx.config.recv_capacity);
    let (outbound_tx, outbound_rx) = mpsc::channel(ctx.config.send_capacity);

    // Register before entering so the client sees its own join
    ctx.notifier
        .register_client(client_id.clone(), outbound_tx)
        .await?;
    ctx.service.enter_room(client_id.clone(), name.clone());

    let cancel = ctx.shutdown.child_token();
    let client = Client::new(
        client_id.clone(),
        name,
        reader,
        writer,
        inbound_tx,
        outbound_rx,
        ctx.config.clone(),
    );
    let tasks = client.start(cancel.clone());
    let forwarder = tokio::spawn(forward_messages(
        client_id.clone(),
        ctx.service.clone(),
        inbound_rx,
        cancel.clone(),
    ));

    // The read loop ending is the single teardown trigger
    match tasks.read.await {
        Ok(Some(reason)) => debug!(client_id = %client_id, %reason, "read loop terminated"),
        Ok(None) => debug!(client_id = %client_id, "read loop cancelled"),
        Err(err) => error!(client_id = %client_id, error = %err, "read task failed"),
    }

    cancel.cancel();
    ctx.service.leave_room(&client_id);
    if let Err(err) = ctx.notifier.unregister_client(client_id.clone()).await {
        warn!(client_id = %client_id, error = %err, "failed to unregister client");
    }

    if let Err(err) = tasks.write.await {
        error!(client_id = %client_id, error = %err, "write task failed");
    }
    if let Err(err) = forwarder.await {
        error!(client_id = %client_id, error = %err, "forward task failed");
    }

    info!("Client {} disconnected", client_id);

    Ok(())
}

/// Feed decoded chat lines from one client into the chat service
async fn forward_messages<N: Notifier>(
    client_id: ClientId,
    service: ChatService<N>,
    mut inbound: mpsc::Receiver<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = inbound.recv() => match message {
                Some(message) => message,
                None => {
                    debug!(client_id = %client_id, "client has closed, exiting forwarder");
                    break;
                }
            },
        };

        match message {
            Message::Chat(chat) => service.send_message(&client_id, chat.message),
            other => debug!(client_id = %client_id, kind = %other.kind(), "ignoring message from client"),
        }
    }
}

/// Non-empty `name` query parameter, URL-decoded
fn client_name(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}
