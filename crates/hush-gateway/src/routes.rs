use axum::{
    Json,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};

use hush_types::api::{
    CreateRoomRequest, JoinRoomRequest, RoomInfo, RoomListResponse, UsersResponse,
};

use crate::connection;
use crate::error::RoomError;
use crate::rooms::RoomRegistry;

pub async fn create_room(
    State(registry): State<RoomRegistry>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<impl IntoResponse, RoomError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(RoomError::MissingFields);
    }

    let room = registry.create_room(&req.password).await.map_err(|e| {
        warn!("Room creation failed: {}", e);
        e
    })?;
    info!("Room {} created by '{}'", room.room_id, req.username);

    Ok((StatusCode::CREATED, Json(room)))
}

pub async fn join_room_by_id(
    State(registry): State<RoomRegistry>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<RoomInfo>, RoomError> {
    match registry.join_by_id(&req.room_id, &req.username, &req.password).await {
        Ok(room) => {
            info!("User '{}' joining room {}", req.username, room.room_hash);
            Ok(Json(room))
        }
        Err(e) => {
            warn!("Join of room ID '{}' by '{}' refused: {}", req.room_id, req.username, e);
            Err(e)
        }
    }
}

pub async fn list_rooms(State(registry): State<RoomRegistry>) -> Json<RoomListResponse> {
    Json(RoomListResponse {
        rooms: registry.list_rooms().await,
    })
}

pub async fn get_room(
    State(registry): State<RoomRegistry>,
    Path(room_hash): Path<String>,
) -> Result<Json<RoomInfo>, RoomError> {
    registry
        .room_info(&room_hash)
        .await
        .map(Json)
        .ok_or(RoomError::RoomNotFound)
}

pub async fn get_users(
    State(registry): State<RoomRegistry>,
    Path(room_hash): Path<String>,
) -> Json<UsersResponse> {
    Json(UsersResponse {
        users: registry.users(&room_hash).await,
    })
}

pub async fn ws_upgrade(
    State(registry): State<RoomRegistry>,
    Path(room_hash): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    info!("WebSocket connection request for room {}", room_hash);
    ws.on_upgrade(move |socket| connection::handle_connection(socket, registry, room_hash))
}
