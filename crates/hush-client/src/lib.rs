//! Hush chat client.
//!
//! `session` is the connection state machine (handshake gating, per-session
//! room key, sealing and opening frames); `connection` drives it over a
//! WebSocket and reports to the UI through `ChatEvent`s.

pub mod api;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod session;

pub use api::RoomApi;
pub use config::ClientConfig;
pub use connection::{ChatConnection, ChatEvent};
pub use credentials::{CredentialStore, Credentials};
pub use error::ChatError;
pub use session::{CloseKind, ConnectionState, Origin, RenderedMessage, Session};
