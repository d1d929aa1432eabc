use serde::de::DeserializeOwned;

use hush_types::api::{CreateRoomRequest, ErrorResponse, JoinRoomRequest, RoomInfo, UsersResponse};

use crate::config::ClientConfig;
use crate::error::ChatError;

/// HTTP side of the relay: room creation, join-by-code and the presence list.
#[derive(Clone)]
pub struct RoomApi {
    http: reqwest::Client,
    base: String,
}

impl RoomApi {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: config.http_base().to_string(),
        }
    }

    pub async fn create_room(&self, username: &str, password: &str) -> Result<RoomInfo, ChatError> {
        let resp = self
            .http
            .post(format!("{}/create-room", self.base))
            .json(&CreateRoomRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn join_room(
        &self,
        room_id: &str,
        username: &str,
        password: &str,
    ) -> Result<RoomInfo, ChatError> {
        let resp = self
            .http
            .post(format!("{}/join-room-by-id", self.base))
            .json(&JoinRoomRequest {
                room_id: room_id.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;
        decode(resp).await
    }

    /// Names of the members currently connected to the room.
    pub async fn users(&self, room_hash: &str) -> Result<Vec<String>, ChatError> {
        let resp = self
            .http
            .get(format!("{}/room/{}/users", self.base, room_hash))
            .send()
            .await?;
        let body: UsersResponse = decode(resp).await?;
        Ok(body.users)
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }

    let message = match resp.json::<ErrorResponse>().await {
        Ok(body) => body.error,
        Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
    };
    Err(ChatError::Api {
        status: status.as_u16(),
        message,
    })
}
