use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use thiserror::Error;

use hush_types::api::ErrorResponse;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("All fields are required.")]
    MissingFields,

    #[error("Room ID not found.")]
    RoomNotFound,

    #[error("Invalid password.")]
    InvalidPassword,

    #[error("Username already taken in this room.")]
    UsernameTaken,

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl RoomError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingFields => StatusCode::BAD_REQUEST,
            Self::RoomNotFound => StatusCode::NOT_FOUND,
            Self::InvalidPassword => StatusCode::UNAUTHORIZED,
            Self::UsernameTaken => StatusCode::CONFLICT,
            Self::PasswordHash(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RoomError {
    fn into_response(self) -> Response {
        // Hashing internals stay in the logs
        let error = match &self {
            Self::PasswordHash(_) => "Internal server error.".to_string(),
            other => other.to_string(),
        };
        (self.status(), Json(ErrorResponse { error })).into_response()
    }
}
