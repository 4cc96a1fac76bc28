use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use room_relay::{decode, encode, ChatRoom, ChatServer, FixedClock, Message, ServerConfig};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn frozen() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 12, 7, 0, 0, 0).unwrap()
}

async fn start_server() -> (SocketAddr, Arc<ChatRoom>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ChatServer::with_clock(ServerConfig::default(), Arc::new(FixedClock(frozen())))
        .expect("default config is valid");
    let room = server.room();
    let shutdown = CancellationToken::new();
    tokio::spawn(server.run(listener, shutdown.clone()));
    (addr, room, shutdown)
}

async fn connect(addr: SocketAddr, name: &str) -> Socket {
    let url = format!("ws://{}/chat?name={}", addr, name);
    let (socket, _) = connect_async(url).await.expect("handshake should succeed");
    socket
}

async fn next_message(socket: &mut Socket) -> Message {
    loop {
        let frame = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("websocket error");
        match frame {
            WsMessage::Text(text) => return decode(text.as_bytes()).expect("valid envelope"),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

#[tokio::test]
async fn clients_receive_membership_and_chat() {
    let (addr, room, shutdown) = start_server().await;

    let mut jane = connect(addr, "Jane").await;
    assert_eq!(next_message(&mut jane).await, Message::user_joined("Jane", frozen()));

    let mut john = connect(addr, "John").await;
    assert_eq!(next_message(&mut jane).await, Message::user_joined("John", frozen()));
    assert_eq!(next_message(&mut john).await, Message::user_joined("John", frozen()));

    // The author is resolved by the server, not taken from the client
    let outgoing = encode(&Message::chat("someone else", "hi", frozen())).unwrap();
    jane.send(WsMessage::Text(String::from_utf8(outgoing).unwrap()))
        .await
        .unwrap();

    let expected = Message::chat("Jane", "hi", frozen());
    assert_eq!(next_message(&mut jane).await, expected);
    assert_eq!(next_message(&mut john).await, expected);

    jane.close(None).await.unwrap();

    assert_eq!(next_message(&mut john).await, Message::user_left("Jane", frozen()));
    let members = room.get_clients();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].name, "John");

    shutdown.cancel();
}

#[tokio::test]
async fn malformed_frames_do_not_drop_the_connection() {
    let (addr, _room, shutdown) = start_server().await;

    let mut jane = connect(addr, "Jane").await;
    assert_eq!(next_message(&mut jane).await, Message::user_joined("Jane", frozen()));

    jane.send(WsMessage::Text("not json".to_string())).await.unwrap();
    jane.send(WsMessage::Text(r#"{"type":"stats","data":{}}"#.to_string()))
        .await
        .unwrap();

    let outgoing = encode(&Message::chat("Jane", "still here", frozen())).unwrap();
    jane.send(WsMessage::Text(String::from_utf8(outgoing).unwrap()))
        .await
        .unwrap();

    assert_eq!(
        next_message(&mut jane).await,
        Message::chat("Jane", "still here", frozen())
    );

    shutdown.cancel();
}

#[tokio::test]
async fn handshake_without_name_is_rejected() {
    let (addr, room, shutdown) = start_server().await;

    assert!(connect_async(format!("ws://{}/chat", addr)).await.is_err());
    assert!(connect_async(format!("ws://{}/elsewhere?name=Jane", addr)).await.is_err());
    assert_eq!(room.participant_count(), 0);

    shutdown.cancel();
}

#[tokio::test]
async fn shutdown_sends_close_frames() {
    let (addr, _room, shutdown) = start_server().await;

    let mut jane = connect(addr, "Jane").await;
    assert_eq!(next_message(&mut jane).await, Message::user_joined("Jane", frozen()));

    shutdown.cancel();

    let frame = timeout(Duration::from_secs(2), jane.next())
        .await
        .expect("timed out waiting for close");
    match frame {
        Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => {}
        other => panic!("expected close frame, got {:?}", other),
    }
}
