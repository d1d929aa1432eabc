use std::time::Duration;

use crate::error::ChatError;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the relay lives and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    server_url: String,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// `server_url` is the HTTP base, e.g. `https://chat.example.com`.
    pub fn new(server_url: impl Into<String>) -> Result<Self, ChatError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ChatError::InvalidServerUrl(server_url));
        }
        Ok(Self {
            server_url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Reads `HUSH_SERVER_URL` and `HUSH_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ChatError> {
        let server_url =
            std::env::var("HUSH_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.into());
        let mut config = Self::new(server_url)?;

        if let Some(secs) = std::env::var("HUSH_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    pub fn http_base(&self) -> &str {
        &self.server_url
    }

    /// WebSocket endpoint for a room; the scheme follows the HTTP base
    /// (`http` -> `ws`, `https` -> `wss`).
    pub fn ws_endpoint(&self, room_hash: &str) -> String {
        let base = self
            .server_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/ws/{}", base, room_hash)
    }
}
