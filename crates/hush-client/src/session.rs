use std::fmt;

use chrono::{DateTime, Local, TimeZone, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use hush_crypto::{DECRYPTION_FAILED, RoomKey};
use hush_types::events::{ChatBroadcast, ClientCommand, HandshakeFrame};

use crate::credentials::Credentials;
use crate::error::ChatError;

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseKind {
    /// Logout, or a normal close from the server
    Clean,
    /// Transport error, rejected handshake, missing credentials, ...
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    AwaitingCredentials,
    Authenticated,
    Closed(CloseKind),
}

impl ConnectionState {
    /// Only an authenticated session may send.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    fn allows(&self, next: &ConnectionState) -> bool {
        use ConnectionState::{AwaitingCredentials, Authenticated, Closed, Connecting, Idle};
        match (self, next) {
            (Closed(_), _) => false,
            (_, Closed(_)) => true,
            (Idle, Connecting) => true,
            (Connecting, AwaitingCredentials) => true,
            (AwaitingCredentials, Authenticated) => true,
            _ => false,
        }
    }
}

/// Whether a message came from this session's user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Mine,
    Other,
}

/// A decrypted inbound message, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub author: String,
    /// Plaintext, or `DECRYPTION_FAILED` if the envelope could not be opened
    pub text: String,
    /// Local time, `dd/mm/yy HH:MM`
    pub timestamp: String,
    pub sent_at_ms: i64,
    pub origin: Origin,
}

/// The connection state machine, independent of the transport.
///
/// `Idle -> Connecting -> AwaitingCredentials -> Authenticated -> Closed`.
/// Any state may jump to `Closed`; nothing leaves `Closed`. Every accepted
/// transition is published on a watch channel.
///
/// The room key is derived once per session and lives only while the session
/// is authenticated.
pub struct Session {
    room: String,
    credentials: Credentials,
    key: Option<RoomKey>,
    state: watch::Sender<ConnectionState>,
}

impl Session {
    /// `room` is the room hash: the URL identifier and key-derivation salt.
    pub fn new(room: impl Into<String>, credentials: Credentials) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            room: room.into(),
            credentials,
            key: None,
            state,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn username(&self) -> &str {
        self.credentials.username()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn transition(&mut self, next: ConnectionState) -> Result<(), ChatError> {
        let current = self.state();
        if !current.allows(&next) {
            debug!("Ignoring transition {:?} -> {:?}", current, next);
            return Err(ChatError::InvalidTransition(current));
        }
        debug!("Session {:?} -> {:?}", current, next);
        self.state.send_replace(next);
        Ok(())
    }

    /// `Idle -> Connecting`: the transport is being opened.
    pub fn start(&mut self) -> Result<(), ChatError> {
        self.transition(ConnectionState::Connecting)
    }

    /// `Connecting -> AwaitingCredentials` once the transport is open.
    ///
    /// Returns the handshake frame to send. With missing credentials the
    /// session closes immediately with an error and can never authenticate.
    pub fn transport_opened(&mut self) -> Result<HandshakeFrame, ChatError> {
        self.transition(ConnectionState::AwaitingCredentials)?;

        if !self.credentials.is_complete() {
            self.close(CloseKind::Error(ChatError::CredentialsMissing.to_string()));
            return Err(ChatError::CredentialsMissing);
        }

        Ok(HandshakeFrame {
            username: self.credentials.username().to_string(),
            password: self.credentials.password().to_string(),
        })
    }

    /// Derive this session's room key on a blocking worker.
    pub async fn derive_key(&self) -> Result<RoomKey, ChatError> {
        let password = Zeroizing::new(self.credentials.password().to_string());
        let salt = self.room.clone();

        tokio::task::spawn_blocking(move || RoomKey::derive(&password, &salt))
            .await
            .map_err(|e| ChatError::KeyDerivation(hush_crypto::CryptoError::KeyDerivation(e.to_string())))?
            .map_err(ChatError::KeyDerivation)
    }

    /// `AwaitingCredentials -> Authenticated` after the handshake frame is sent.
    /// There is no server acknowledgment; the server closes the socket if it
    /// rejects us.
    pub fn authenticated(&mut self, key: RoomKey) -> Result<(), ChatError> {
        self.transition(ConnectionState::Authenticated)?;
        self.key = Some(key);
        Ok(())
    }

    /// Encrypt outbound text into a `message` command.
    /// Rejected if the session is not authenticated or the trimmed text is empty.
    pub fn seal_outbound(&self, text: &str) -> Result<ClientCommand, ChatError> {
        let text = text.trim();
        let key = match &self.key {
            Some(key) if self.state().is_open() && !text.is_empty() => key,
            _ => return Err(ChatError::SendRejected),
        };

        let envelope = key.seal(text).map_err(ChatError::Encryption)?;
        Ok(ClientCommand::Message { text: envelope })
    }

    /// Parse and decrypt one inbound frame.
    ///
    /// A frame that does not parse is an error (callers log and drop it). A
    /// frame that parses but does not decrypt still renders, with the
    /// `DECRYPTION_FAILED` placeholder as its text.
    pub fn open_inbound(&self, raw: &str) -> Result<RenderedMessage, ChatError> {
        let key = match &self.key {
            Some(key) if self.state().is_open() => key,
            _ => return Err(ChatError::InvalidTransition(self.state())),
        };

        let frame: ChatBroadcast =
            serde_json::from_str(raw).map_err(|e| ChatError::MalformedFrame(e.to_string()))?;

        let text = key.open(&frame.text).unwrap_or_else(|e| {
            warn!("Message from '{}' could not be decrypted: {}", frame.username, e);
            DECRYPTION_FAILED.to_string()
        });

        let origin = if frame.username == self.credentials.username() {
            Origin::Mine
        } else {
            Origin::Other
        };

        Ok(RenderedMessage {
            author: frame.username,
            text,
            timestamp: format_timestamp(frame.timestamp),
            sent_at_ms: frame.timestamp,
            origin,
        })
    }

    /// Move to `Closed` and drop the room key. No-op if already closed.
    pub fn close(&mut self, kind: CloseKind) {
        if self.transition(ConnectionState::Closed(kind)).is_ok() {
            self.key = None;
        }
    }

    /// Explicit logout: close cleanly and wipe the credentials.
    pub fn logout(&mut self) {
        self.close(CloseKind::Clean);
        self.key = None;
        self.credentials = Credentials::default();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("room", &self.room)
            .field("username", &self.credentials.username())
            .field("state", &self.state())
            .finish()
    }
}

/// Format a UTC epoch-millisecond timestamp in the local time zone.
pub fn format_timestamp(epoch_ms: i64) -> String {
    format_timestamp_in(epoch_ms, &Local)
}

/// `dd/mm/yy HH:MM` in `tz`. Out-of-range values fall back to the raw number.
pub fn format_timestamp_in<Tz>(epoch_ms: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    match DateTime::<Utc>::from_timestamp_millis(epoch_ms) {
        Some(utc) => utc.with_timezone(tz).format("%d/%m/%y %H:%M").to_string(),
        None => epoch_ms.to_string(),
    }
}
