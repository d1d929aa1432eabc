use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use hush_types::events::{ClientCommand, HandshakeFrame};

use crate::rooms::RoomRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh socket may take to send its handshake frame.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection for `room_hash`.
///
/// The first text frame must be a `HandshakeFrame` carrying the room password.
/// Anything else, an unknown room or a wrong password closes with 1008.
pub async fn handle_connection(socket: WebSocket, registry: RoomRegistry, room_hash: String) {
    let (mut sender, mut receiver) = socket.split();

    let handshake = match wait_for_handshake(&mut receiver).await {
        Some(handshake) => handshake,
        None => {
            warn!("Client for room {} sent no valid handshake, closing", room_hash);
            close_policy(&mut sender, "Invalid handshake").await;
            return;
        }
    };

    if handshake.username.is_empty() {
        warn!("Empty username in handshake for room {}", room_hash);
        close_policy(&mut sender, "Username required").await;
        return;
    }

    if let Err(e) = registry.verify_password(&room_hash, &handshake.password).await {
        warn!("Handshake rejected for '{}' in room {}: {}", handshake.username, room_hash, e);
        close_policy(&mut sender, &e.to_string()).await;
        return;
    }

    let username = handshake.username;
    let (conn_id, member_rx) = match registry.join(&room_hash, &username).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!("Failed to register '{}' in room {}: {}", username, room_hash, e);
            close_policy(&mut sender, &e.to_string()).await;
            return;
        }
    };

    info!("{} ({}) connected to room {}", username, conn_id, room_hash);

    run_connection_loop(sender, receiver, member_rx, &registry, &room_hash, &username).await;

    registry.leave(&room_hash, conn_id).await;
    info!("{} ({}) disconnected from room {}", username, conn_id, room_hash);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut member_rx: mpsc::UnboundedReceiver<String>,
    registry: &RoomRegistry,
    room_hash: &str,
    username: &str,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room broadcasts -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = member_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let registry_recv = registry.clone();
    let room_recv = room_hash.to_string();
    let username_recv = username.to_string();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(ClientCommand::Message { text }) => {
                        registry_recv.broadcast(&room_recv, &username_recv, text).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} in room {} sent a bad command: {} ({} bytes)",
                            username_recv,
                            room_recv,
                            e,
                            text.len()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn wait_for_handshake(receiver: &mut SplitStream<WebSocket>) -> Option<HandshakeFrame> {
    let first_text = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => return serde_json::from_str::<HandshakeFrame>(&text).ok(),
                Message::Close(_) => return None,
                _ => {}
            }
        }
        None
    };

    tokio::time::timeout(HANDSHAKE_TIMEOUT, first_text).await.ok().flatten()
}

async fn close_policy(sender: &mut SplitSink<WebSocket, Message>, reason: &str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.to_string().into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
