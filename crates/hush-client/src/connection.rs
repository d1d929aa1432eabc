use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::api::RoomApi;
use crate::config::ClientConfig;
use crate::credentials::Credentials;
use crate::error::ChatError;
use crate::session::{CloseKind, ConnectionState, RenderedMessage, Session};

pub const NOTICE_TRANSPORT_ERROR: &str = "WebSocket error. Please try again later.";
pub const NOTICE_CLOSED: &str = "WebSocket connection closed.";

/// Close frame without a status code (RFC 6455 section 7.1.5).
const CLOSE_NO_STATUS: u16 = 1005;
/// Connection lost without any close frame.
const CLOSE_ABNORMAL: u16 = 1006;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// What the UI needs to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A decrypted (or placeholder) message, in delivery order
    Message(RenderedMessage),
    /// A user-visible banner: send refused, connection error or close
    Notice(String),
    /// Fresh member list for the room
    Presence(Vec<String>),
    /// Credentials were missing; send the user back to the entry point
    Redirect,
}

enum Command {
    Send(String),
    Logout,
}

/// Handle to one live chat session.
///
/// A single task owns the socket and the `Session`; inbound frames are
/// processed one at a time, decrypt included, so rendering order matches
/// delivery order. There is no reconnect: once the state reaches `Closed`,
/// build a new connection to try again.
pub struct ChatConnection {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<ChatEvent>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl ChatConnection {
    /// Open a session for `room_hash`. Returns immediately; progress is
    /// visible through `state()` and the event receiver.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(
        config: &ClientConfig,
        room_hash: &str,
        credentials: Credentials,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let mut session = Session::new(room_hash, credentials);
        let state = session.subscribe();
        if let Err(e) = session.start() {
            error!("Session for room {} did not start: {}", room_hash, e);
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            session,
            url: config.ws_endpoint(room_hash),
            connect_timeout: config.connect_timeout,
            api: RoomApi::new(config),
            events: events.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx));

        (
            Self {
                commands,
                events,
                state,
                task,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Encrypt and send a message.
    ///
    /// Refused, with a notice, when the text is blank or the session is not
    /// authenticated.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        if text.trim().is_empty() || !self.state().is_open() {
            let _ = self.events.send(ChatEvent::Notice(ChatError::SendRejected.to_string()));
            return Err(ChatError::SendRejected);
        }
        self.commands
            .send(Command::Send(text.to_string()))
            .map_err(|_| ChatError::SendRejected)
    }

    /// Close the session cleanly. The caller clears its credential store.
    pub fn logout(&self) {
        let _ = self.commands.send(Command::Logout);
    }

    /// Wait until the session has reached `Closed`.
    pub async fn closed(&self) -> ConnectionState {
        let mut state = self.state.clone();
        let closed = match state.wait_for(ConnectionState::is_closed).await {
            Ok(closed) => closed.clone(),
            // Sender gone: the driver exited, so the last value is final
            Err(_) => self.state(),
        };
        closed
    }
}

impl Drop for ChatConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Driver {
    session: Session,
    url: String,
    connect_timeout: std::time::Duration,
    api: RoomApi,
    events: mpsc::UnboundedSender<ChatEvent>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Connecting to {}", self.url);
        let ws = match tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return self.fail(ChatError::Transport(e)),
            Err(_) => return self.fail(ChatError::ConnectTimeout),
        };
        info!("Connected to WebSocket for room {}", self.session.room());

        let (mut sink, mut stream) = ws.split();

        let handshake = match self.session.transport_opened() {
            Ok(handshake) => handshake,
            Err(ChatError::CredentialsMissing) => {
                warn!("No session credentials, redirecting to entry point");
                let _ = sink.send(Message::Close(None)).await;
                self.emit(ChatEvent::Notice(ChatError::CredentialsMissing.to_string()));
                self.emit(ChatEvent::Redirect);
                return;
            }
            Err(e) => return self.fail(e),
        };

        let key = match self.session.derive_key().await {
            Ok(key) => key,
            Err(e) => {
                let _ = sink.send(Message::Close(None)).await;
                return self.fail(e);
            }
        };

        let handshake = match serde_json::to_string(&handshake) {
            Ok(json) => json,
            Err(e) => return self.fail(ChatError::MalformedFrame(e.to_string())),
        };
        if let Err(e) = sink.send(Message::Text(handshake.into())).await {
            return self.fail(ChatError::Transport(e));
        }
        if let Err(e) = self.session.authenticated(key) {
            return self.fail(e);
        }
        info!("Authenticated as '{}'", self.session.username());
        self.refresh_presence();

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Send(text)) => {
                        if !self.send_message(&mut sink, &text).await {
                            break;
                        }
                    }
                    Some(Command::Logout) | None => {
                        info!("Logging out of room {}", self.session.room());
                        self.session.logout();
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.receive_message(&text),
                    Some(Ok(Message::Close(frame))) => {
                        match frame {
                            Some(frame) => {
                                self.closed_by_server(u16::from(frame.code), frame.reason.to_string())
                            }
                            None => self.closed_by_server(CLOSE_NO_STATUS, String::new()),
                        }
                        break;
                    }
                    // Ping/Pong are answered by tungstenite; binary is not part of the protocol
                    Some(Ok(_)) => {}
                    Some(Err(e)) if is_dropped(&e) => {
                        debug!("Transport dropped: {}", e);
                        self.closed_by_server(CLOSE_ABNORMAL, String::new());
                        break;
                    }
                    Some(Err(e)) => {
                        self.fail(ChatError::Transport(e));
                        break;
                    }
                    None => {
                        self.closed_by_server(CLOSE_ABNORMAL, String::new());
                        break;
                    }
                },
            }
        }
    }

    /// Returns false if the transport failed and the session is over.
    async fn send_message(&mut self, sink: &mut WsSink, text: &str) -> bool {
        let command = match self.session.seal_outbound(text) {
            Ok(command) => command,
            Err(e) => {
                self.emit(ChatEvent::Notice(e.to_string()));
                return true;
            }
        };

        let json = match serde_json::to_string(&command) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode outbound message: {}", e);
                return true;
            }
        };

        if let Err(e) = sink.send(Message::Text(json.into())).await {
            if is_dropped(&e) {
                self.closed_by_server(CLOSE_ABNORMAL, String::new());
            } else {
                self.fail(ChatError::Transport(e));
            }
            return false;
        }
        self.refresh_presence();
        true
    }

    fn receive_message(&mut self, raw: &str) {
        match self.session.open_inbound(raw) {
            Ok(message) => {
                self.emit(ChatEvent::Message(message));
                self.refresh_presence();
            }
            Err(e) => warn!("Dropping inbound frame ({} bytes): {}", raw.len(), e),
        }
    }

    /// The server closed the socket, or the connection went away without a
    /// close frame (`CLOSE_ABNORMAL`).
    fn closed_by_server(&mut self, code: u16, reason: String) {
        match code {
            1000 | 1001 | CLOSE_NO_STATUS => {
                info!("WebSocket closed by server (code {})", code);
                self.session.close(CloseKind::Clean);
                self.emit(ChatEvent::Notice(NOTICE_CLOSED.to_string()));
            }
            _ => {
                warn!("Connection closed unexpectedly. Code: {}, Reason: {}", code, reason);
                let err = ChatError::TransportClosed {
                    code,
                    reason: reason.clone(),
                };
                self.session.close(CloseKind::Error(err.to_string()));
                self.emit(ChatEvent::Notice(format!(
                    "{} Code: {}, Reason: {}",
                    NOTICE_CLOSED, code, reason
                )));
            }
        }
    }

    /// Fatal error: close the session and show the error banner.
    fn fail(&mut self, err: ChatError) {
        error!("WebSocket error in room {}: {}", self.session.room(), err);
        self.session.close(CloseKind::Error(err.to_string()));
        self.emit(ChatEvent::Notice(NOTICE_TRANSPORT_ERROR.to_string()));
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    /// Fire-and-forget presence refresh; failures are only logged.
    fn refresh_presence(&self) {
        let api = self.api.clone();
        let room = self.session.room().to_string();
        let events = self.events.clone();
        tokio::spawn(async move {
            match api.users(&room).await {
                Ok(users) => {
                    let _ = events.send(ChatEvent::Presence(users));
                }
                Err(e) => warn!("Failed to fetch user list for room {}: {}", room, e),
            }
        });
    }
}

/// The peer went away without completing the closing handshake.
fn is_dropped(err: &WsError) -> bool {
    matches!(
        err,
        WsError::ConnectionClosed
            | WsError::AlreadyClosed
            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}
