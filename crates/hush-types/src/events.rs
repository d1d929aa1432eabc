use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::CipherEnvelope;

/// First frame a client sends on a fresh WebSocket.
///
/// Sent in the clear (the transport's TLS is responsible for it); the relay
/// validates the password against the room and closes with 1008 on mismatch.
#[derive(Clone, Serialize, Deserialize)]
pub struct HandshakeFrame {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for HandshakeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeFrame")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Commands sent FROM client TO server after the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientCommand {
    /// An encrypted chat message for the whole room
    Message { text: CipherEnvelope },
}

/// A chat message relayed by the server to every member of the room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBroadcast {
    pub username: String,
    /// UTC epoch milliseconds, stamped by the relay
    pub timestamp: i64,
    pub text: CipherEnvelope,
}
