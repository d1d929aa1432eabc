/// End-to-end tests: a real relay on a loopback port, real `ChatConnection`s.
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, UrlError};

use hush_client::connection::{NOTICE_CLOSED, NOTICE_TRANSPORT_ERROR};
use hush_client::error::SEND_REJECTED;
use hush_client::{
    ChatConnection, ChatError, ChatEvent, ClientConfig, CloseKind, ConnectionState, Credentials,
    Origin, RenderedMessage, RoomApi,
};
use hush_gateway::RoomRegistry;

const STEP: Duration = Duration::from_secs(15);
const PASSWORD: &str = "room-secret";

async fn spawn_relay() -> (SocketAddr, RoomRegistry) {
    let registry = RoomRegistry::new();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = hush_gateway::router(registry.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, registry)
}

async fn setup() -> (ClientConfig, RoomRegistry, String) {
    let (addr, registry) = spawn_relay().await;
    let config = ClientConfig::new(format!("http://{}", addr)).unwrap();
    let room = RoomApi::new(&config).create_room("alice", PASSWORD).await.unwrap();
    (config, registry, room.room_hash)
}

async fn wait_for_state(
    chat: &ChatConnection,
    pred: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut state = chat.watch_state();
    let reached = tokio::time::timeout(STEP, state.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for state")
        .unwrap()
        .clone();
    reached
}

/// Block until the relay has registered every name in `expected`.
async fn wait_for_members(registry: &RoomRegistry, room_hash: &str, expected: &[&str]) {
    tokio::time::timeout(STEP, async {
        loop {
            let users = registry.users(room_hash).await;
            if expected.iter().all(|name| users.iter().any(|u| u == name)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("members never joined");
}

async fn next_message(events: &mut UnboundedReceiver<ChatEvent>) -> RenderedMessage {
    loop {
        let event = tokio::time::timeout(STEP, events.recv()).await.unwrap().unwrap();
        if let ChatEvent::Message(msg) = event {
            return msg;
        }
    }
}

async fn next_notice(events: &mut UnboundedReceiver<ChatEvent>) -> String {
    loop {
        let event = tokio::time::timeout(STEP, events.recv()).await.unwrap().unwrap();
        if let ChatEvent::Notice(notice) = event {
            return notice;
        }
    }
}

async fn join(
    config: &ClientConfig,
    registry: &RoomRegistry,
    room_hash: &str,
    username: &str,
) -> (ChatConnection, UnboundedReceiver<ChatEvent>) {
    let (chat, events) =
        ChatConnection::connect(config, room_hash, Credentials::new(username, PASSWORD));
    wait_for_state(&chat, ConnectionState::is_open).await;
    wait_for_members(registry, room_hash, &[username]).await;
    (chat, events)
}

#[tokio::test]
async fn two_members_exchange_messages() {
    let (config, registry, room_hash) = setup().await;
    let (alice, mut alice_events) = join(&config, &registry, &room_hash, "alice").await;
    let (bob, mut bob_events) = join(&config, &registry, &room_hash, "bob").await;

    alice.send("hello bob").unwrap();

    let at_bob = next_message(&mut bob_events).await;
    assert_eq!(at_bob.author, "alice");
    assert_eq!(at_bob.text, "hello bob");
    assert_eq!(at_bob.origin, Origin::Other);

    let at_alice = next_message(&mut alice_events).await;
    assert_eq!(at_alice.text, "hello bob");
    assert_eq!(at_alice.origin, Origin::Mine);
    assert_eq!(at_alice.sent_at_ms, at_bob.sent_at_ms);

    bob.send("  hi alice  ").unwrap();
    let reply = next_message(&mut alice_events).await;
    assert_eq!(reply.author, "bob");
    assert_eq!(reply.text, "hi alice");
}

#[tokio::test]
async fn messages_render_in_send_order() {
    let (config, registry, room_hash) = setup().await;
    let (alice, _alice_events) = join(&config, &registry, &room_hash, "alice").await;
    let (_bob, mut bob_events) = join(&config, &registry, &room_hash, "bob").await;

    for text in ["one", "two", "three", "four"] {
        alice.send(text).unwrap();
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_message(&mut bob_events).await.text);
    }
    assert_eq!(received, ["one", "two", "three", "four"]);
}

#[tokio::test]
async fn relay_only_sees_ciphertext() {
    let (config, registry, room_hash) = setup().await;
    let (alice, _alice_events) = join(&config, &registry, &room_hash, "alice").await;

    // Watch the wire from a raw socket that joined with the right password
    let (mut raw, _) = tokio_tungstenite::connect_async(config.ws_endpoint(&room_hash))
        .await
        .unwrap();
    raw.send(Message::Text(
        serde_json::json!({ "username": "eve", "password": PASSWORD }).to_string().into(),
    ))
    .await
    .unwrap();
    wait_for_members(&registry, &room_hash, &["alice", "eve"]).await;

    alice.send("attack at dawn").unwrap();

    let frame = loop {
        let msg = tokio::time::timeout(STEP, raw.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            break text.to_string();
        }
    };
    assert!(!frame.contains("attack at dawn"));

    let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
    let bytes = value["text"].as_array().unwrap();
    // nonce + "attack at dawn" + tag
    assert_eq!(bytes.len(), 12 + 14 + 16);
}

#[tokio::test]
async fn wrong_password_closes_with_error() {
    let (config, _registry, room_hash) = setup().await;
    let (chat, mut events) =
        ChatConnection::connect(&config, &room_hash, Credentials::new("mallory", "guess"));

    let closed = tokio::time::timeout(STEP, chat.closed()).await.unwrap();
    let ConnectionState::Closed(CloseKind::Error(reason)) = closed else {
        panic!("expected an error close, got {:?}", closed);
    };
    assert!(reason.contains("1008"));

    let notice = next_notice(&mut events).await;
    assert!(notice.starts_with(NOTICE_CLOSED));
    assert!(notice.contains("Invalid password."));
}

#[tokio::test]
async fn missing_credentials_redirect_without_authenticating() {
    let (config, _registry, room_hash) = setup().await;
    let (chat, mut events) =
        ChatConnection::connect(&config, &room_hash, Credentials::new("alice", ""));

    let closed = tokio::time::timeout(STEP, chat.closed()).await.unwrap();
    assert!(matches!(closed, ConnectionState::Closed(CloseKind::Error(_))));

    let notice = tokio::time::timeout(STEP, events.recv()).await.unwrap().unwrap();
    assert_eq!(
        notice,
        ChatEvent::Notice(ChatError::CredentialsMissing.to_string())
    );
    let event = tokio::time::timeout(STEP, events.recv()).await.unwrap().unwrap();
    assert_eq!(event, ChatEvent::Redirect);
    assert!(matches!(chat.send("hello"), Err(ChatError::SendRejected)));
}

#[tokio::test]
async fn empty_or_early_sends_are_rejected() {
    let (config, registry, room_hash) = setup().await;

    let (pending, mut pending_events) =
        ChatConnection::connect(&config, &room_hash, Credentials::new("carol", PASSWORD));
    if !pending.state().is_open() {
        assert!(matches!(pending.send("too soon"), Err(ChatError::SendRejected)));
        assert_eq!(next_notice(&mut pending_events).await, SEND_REJECTED);
    }

    let (alice, mut events) = join(&config, &registry, &room_hash, "alice").await;
    for blank in ["", "   ", "\n\t"] {
        assert!(matches!(alice.send(blank), Err(ChatError::SendRejected)));
        assert_eq!(next_notice(&mut events).await, SEND_REJECTED);
    }
}

#[tokio::test]
async fn logout_closes_cleanly() {
    let (config, registry, room_hash) = setup().await;
    let (alice, _events) = join(&config, &registry, &room_hash, "alice").await;

    alice.logout();
    let closed = tokio::time::timeout(STEP, alice.closed()).await.unwrap();
    assert_eq!(closed, ConnectionState::Closed(CloseKind::Clean));
    assert!(matches!(alice.send("anyone?"), Err(ChatError::SendRejected)));

    tokio::time::timeout(STEP, async {
        while !registry.users(&room_hash).await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("relay never dropped the member");
}

#[tokio::test]
async fn presence_reported_after_join() {
    let (config, registry, room_hash) = setup().await;
    let (_alice, mut events) = join(&config, &registry, &room_hash, "alice").await;
    let (bob, _bob_events) = join(&config, &registry, &room_hash, "bob").await;

    // Sends trigger a presence refresh as well
    bob.send("ping").unwrap();

    let users = tokio::time::timeout(STEP, async {
        loop {
            if let Some(ChatEvent::Presence(users)) = events.recv().await {
                if users.len() == 2 {
                    return users;
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(users, ["alice", "bob"]);
}

#[tokio::test]
async fn unreachable_server_reports_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::new(format!("http://{}", addr)).unwrap();
    let (chat, mut events) =
        ChatConnection::connect(&config, "nowhere", Credentials::new("alice", PASSWORD));

    let closed = tokio::time::timeout(STEP, chat.closed()).await.unwrap();
    assert!(matches!(closed, ConnectionState::Closed(CloseKind::Error(_))));
    assert_eq!(next_notice(&mut events).await, NOTICE_TRANSPORT_ERROR);
}

/// A bare WebSocket server for one client: reads the handshake frame, then
/// hands the socket to `then`.
async fn spawn_bare_server<F, Fut>(then: F) -> ClientConfig
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(_))) => break,
                Some(Ok(_)) => continue,
                _ => return,
            }
        }
        then(ws).await;
    });
    ClientConfig::new(format!("http://{}", addr)).unwrap()
}

#[tokio::test]
async fn dropped_transport_reports_unclean_close() {
    let config = spawn_bare_server(|ws| async move { drop(ws) }).await;
    let (chat, mut events) =
        ChatConnection::connect(&config, "abc123", Credentials::new("alice", PASSWORD));

    let closed = tokio::time::timeout(STEP, chat.closed()).await.unwrap();
    let ConnectionState::Closed(CloseKind::Error(reason)) = closed else {
        panic!("expected an error close, got {:?}", closed);
    };
    assert!(reason.contains("1006"));

    let notice = next_notice(&mut events).await;
    assert!(notice.starts_with(NOTICE_CLOSED), "{}", notice);
    assert!(notice.contains("1006"));
}

#[tokio::test]
async fn close_without_status_is_clean() {
    let config = spawn_bare_server(|mut ws| async move {
        ws.send(Message::Close(None)).await.unwrap();
        // Wait for the client's close reply
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
    let (chat, mut events) =
        ChatConnection::connect(&config, "abc123", Credentials::new("alice", PASSWORD));

    let closed = tokio::time::timeout(STEP, chat.closed()).await.unwrap();
    assert_eq!(closed, ConnectionState::Closed(CloseKind::Clean));
    assert_eq!(next_notice(&mut events).await, NOTICE_CLOSED);
}

#[tokio::test]
async fn secure_endpoint_attempts_tls() {
    // Accepts TCP and hangs up, so the TLS handshake itself fails
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let config = ClientConfig::new(format!("https://{}", addr)).unwrap();
    let url = config.ws_endpoint("abc123");
    assert!(url.starts_with("wss://"));

    let err = tokio::time::timeout(STEP, tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap_err();
    assert!(
        !matches!(err, WsError::Url(UrlError::TlsFeatureNotEnabled)),
        "wss rejected before connecting: {}",
        err
    );
}
