//! Room relay for hush: creates password-protected rooms, checks the
//! WebSocket handshake, and fans encrypted envelopes out to room members.
//! It never holds a room key and never sees plaintext.

pub mod connection;
pub mod error;
pub mod rooms;
pub mod routes;

use axum::{
    Router,
    routing::{get, post},
};

pub use error::RoomError;
pub use rooms::RoomRegistry;

/// All HTTP and WebSocket routes, without transport layers (CORS, tracing).
pub fn router(registry: RoomRegistry) -> Router {
    Router::new()
        .route("/create-room", post(routes::create_room))
        .route("/join-room-by-id", post(routes::join_room_by_id))
        .route("/rooms", get(routes::list_rooms))
        .route("/room/{room_hash}", get(routes::get_room))
        .route("/room/{room_hash}/users", get(routes::get_users))
        .route("/ws/{room_hash}", get(routes::ws_upgrade))
        .with_state(registry)
}
