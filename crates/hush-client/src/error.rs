use thiserror::Error;

use hush_crypto::CryptoError;

use crate::session::ConnectionState;

/// Text shown when a send is refused.
pub const SEND_REJECTED: &str = "Cannot send an empty message or WebSocket is not open.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("session credentials are missing")]
    CredentialsMissing,

    #[error("could not derive the room key: {0}")]
    KeyDerivation(#[source] CryptoError),

    #[error("could not encrypt message: {0}")]
    Encryption(#[source] CryptoError),

    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection closed (code {code}): {reason}")]
    TransportClosed { code: u16, reason: String },

    #[error("timed out opening the connection")]
    ConnectTimeout,

    #[error("server URL must start with http:// or https://, got '{0}'")]
    InvalidServerUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server refused request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("{}", SEND_REJECTED)]
    SendRejected,

    #[error("cannot leave state {0:?} that way")]
    InvalidTransition(ConnectionState),
}
