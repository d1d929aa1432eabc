use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use hush_types::api::RoomInfo;
use hush_types::events::ChatBroadcast;
use hush_types::models::CipherEnvelope;

use crate::error::RoomError;

/// Length of the numeric room code people share to join.
const ROOM_ID_LEN: usize = 6;

/// Messages queued while a member is alone in a room, flushed to the next joiner.
const MAX_PENDING_MESSAGES: usize = 100;

/// A connected member of a room.
struct Member {
    conn_id: Uuid,
    username: String,
    tx: mpsc::UnboundedSender<String>,
}

struct Room {
    room_id: String,
    /// Argon2id PHC string of the room password
    password_hash: String,
    /// Members in join order
    members: Vec<Member>,
    pending: VecDeque<String>,
}

#[derive(Default)]
struct RegistryState {
    /// room_hash -> room
    rooms: HashMap<String, Room>,
    /// room_id -> room_hash
    room_ids: HashMap<String, String>,
}

/// Tracks rooms and their live members, and relays broadcasts.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room protected by `password`. Returns its short id and hash.
    pub async fn create_room(&self, password: &str) -> Result<RoomInfo, RoomError> {
        if password.is_empty() {
            return Err(RoomError::MissingFields);
        }

        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| RoomError::PasswordHash(e.to_string()))?
            .to_string();

        let mut state = self.inner.write().await;

        let mut room_id = generate_room_id();
        while state.room_ids.contains_key(&room_id) {
            room_id = generate_room_id();
        }
        let room_hash = room_hash(&room_id);

        state.room_ids.insert(room_id.clone(), room_hash.clone());
        state.rooms.insert(
            room_hash.clone(),
            Room {
                room_id: room_id.clone(),
                password_hash,
                members: Vec::new(),
                pending: VecDeque::new(),
            },
        );

        info!("Created room {} ({})", room_id, room_hash);
        Ok(RoomInfo { room_id, room_hash })
    }

    pub async fn room_info(&self, room_hash: &str) -> Option<RoomInfo> {
        self.inner.read().await.rooms.get(room_hash).map(|room| RoomInfo {
            room_id: room.room_id.clone(),
            room_hash: room_hash.to_string(),
        })
    }

    pub async fn list_rooms(&self) -> Vec<String> {
        self.inner.read().await.rooms.keys().cloned().collect()
    }

    /// Validate a join-by-code request. Does not register a member; that
    /// happens when the WebSocket handshake completes.
    pub async fn join_by_id(
        &self,
        room_id: &str,
        username: &str,
        password: &str,
    ) -> Result<RoomInfo, RoomError> {
        if room_id.is_empty() || username.is_empty() || password.is_empty() {
            return Err(RoomError::MissingFields);
        }

        let room_hash = self
            .inner
            .read()
            .await
            .room_ids
            .get(room_id)
            .cloned()
            .ok_or(RoomError::RoomNotFound)?;

        self.verify_password(&room_hash, password).await?;

        let taken = {
            let state = self.inner.read().await;
            state
                .rooms
                .get(&room_hash)
                .is_some_and(|room| room.members.iter().any(|m| m.username == username))
        };
        if taken {
            return Err(RoomError::UsernameTaken);
        }

        Ok(RoomInfo {
            room_id: room_id.to_string(),
            room_hash,
        })
    }

    /// Check `password` against the room's stored hash.
    pub async fn verify_password(&self, room_hash: &str, password: &str) -> Result<(), RoomError> {
        let stored = self
            .inner
            .read()
            .await
            .rooms
            .get(room_hash)
            .map(|room| room.password_hash.clone())
            .ok_or(RoomError::RoomNotFound)?;

        let parsed = PasswordHash::new(&stored).map_err(|e| RoomError::PasswordHash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| RoomError::InvalidPassword)
    }

    /// Register a member. Returns (conn_id, receiver of JSON frames to forward).
    /// Anything queued while the room had a single member is delivered first.
    pub async fn join(
        &self,
        room_hash: &str,
        username: &str,
    ) -> Result<(Uuid, mpsc::UnboundedReceiver<String>), RoomError> {
        let mut state = self.inner.write().await;
        let room = state.rooms.get_mut(room_hash).ok_or(RoomError::RoomNotFound)?;

        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        for frame in room.pending.drain(..) {
            let _ = tx.send(frame);
        }

        room.members.push(Member {
            conn_id,
            username: username.to_string(),
            tx,
        });

        info!("User '{}' joined room {}", username, room.room_id);
        Ok((conn_id, rx))
    }

    /// Remove a member. The room itself stays open for later joins.
    pub async fn leave(&self, room_hash: &str, conn_id: Uuid) {
        let mut state = self.inner.write().await;
        if let Some(room) = state.rooms.get_mut(room_hash) {
            if let Some(pos) = room.members.iter().position(|m| m.conn_id == conn_id) {
                let member = room.members.remove(pos);
                info!("User '{}' left room {}", member.username, room.room_id);
            }
            if room.members.is_empty() {
                debug!("Room {} has no members", room.room_id);
            }
        }
    }

    /// Stamp and relay an envelope to every member of the room.
    ///
    /// A lone member gets the echo, and the frame is also queued for whoever
    /// joins next.
    pub async fn broadcast(&self, room_hash: &str, username: &str, text: CipherEnvelope) {
        let message = ChatBroadcast {
            username: username.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            text,
        };
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode broadcast for room {}: {}", room_hash, e);
                return;
            }
        };

        let mut state = self.inner.write().await;
        let Some(room) = state.rooms.get_mut(room_hash) else {
            return;
        };

        debug!(
            "Broadcasting {} byte envelope from '{}' to {} member(s) of room {}",
            message.text.len(),
            username,
            room.members.len(),
            room.room_id
        );

        if room.members.len() == 1 {
            if room.pending.len() == MAX_PENDING_MESSAGES {
                room.pending.pop_front();
            }
            room.pending.push_back(json.clone());
        }

        for member in &room.members {
            let _ = member.tx.send(json.clone());
        }
    }

    /// Usernames of live members, in join order. Unknown rooms are empty.
    pub async fn users(&self, room_hash: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .rooms
            .get(room_hash)
            .map(|room| room.members.iter().map(|m| m.username.clone()).collect())
            .unwrap_or_default()
    }
}

fn generate_room_id() -> String {
    let mut rng = rand::rng();
    (0..ROOM_ID_LEN)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

/// The public room identifier: hex SHA-256 of the numeric room id.
pub fn room_hash(room_id: &str) -> String {
    hex::encode(Sha256::digest(room_id.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_ids_are_six_digits() {
        for _ in 0..50 {
            let id = generate_room_id();
            assert_eq!(id.len(), ROOM_ID_LEN);
            assert!(id.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn room_hash_is_sha256_hex() {
        assert_eq!(
            room_hash("123456"),
            "8d969eef6ecad3c29a3a629280e686cf0c3f5d5a86aff3ca12020c923adc6c92"
        );
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let registry = RoomRegistry::new();
        let info = registry.create_room("room-secret").await.unwrap();

        assert_eq!(info.room_hash, room_hash(&info.room_id));
        assert_eq!(registry.room_info(&info.room_hash).await, Some(info.clone()));
        assert_eq!(registry.list_rooms().await, vec![info.room_hash]);
    }

    #[tokio::test]
    async fn join_by_id_validation() {
        let registry = RoomRegistry::new();
        let info = registry.create_room("room-secret").await.unwrap();

        assert!(matches!(
            registry.join_by_id("", "alice", "room-secret").await,
            Err(RoomError::MissingFields)
        ));
        assert!(matches!(
            registry.join_by_id("nope", "alice", "room-secret").await,
            Err(RoomError::RoomNotFound)
        ));
        assert!(matches!(
            registry.join_by_id(&info.room_id, "alice", "wrong").await,
            Err(RoomError::InvalidPassword)
        ));
        assert_eq!(
            registry.join_by_id(&info.room_id, "alice", "room-secret").await.unwrap(),
            info
        );

        let _member = registry.join(&info.room_hash, "alice").await.unwrap();
        assert!(matches!(
            registry.join_by_id(&info.room_id, "alice", "room-secret").await,
            Err(RoomError::UsernameTaken)
        ));
    }

    #[tokio::test]
    async fn lone_member_messages_reach_next_joiner() {
        let registry = RoomRegistry::new();
        let info = registry.create_room("room-secret").await.unwrap();

        let (_alice_id, mut alice_rx) = registry.join(&info.room_hash, "alice").await.unwrap();
        registry
            .broadcast(&info.room_hash, "alice", CipherEnvelope::from_bytes(vec![1, 2, 3]))
            .await;

        // Echoed to the sender
        let echoed: ChatBroadcast = serde_json::from_str(&alice_rx.recv().await.unwrap()).unwrap();
        assert_eq!(echoed.username, "alice");
        assert_eq!(echoed.text.as_bytes(), &[1, 2, 3]);

        // And replayed to the next member
        let (_bob_id, mut bob_rx) = registry.join(&info.room_hash, "bob").await.unwrap();
        let replayed: ChatBroadcast = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(replayed.text.as_bytes(), &[1, 2, 3]);

        // Two members: no queueing, both receive
        registry
            .broadcast(&info.room_hash, "bob", CipherEnvelope::from_bytes(vec![4]))
            .await;
        assert!(alice_rx.recv().await.is_some());
        assert!(bob_rx.recv().await.is_some());

        let (_carol_id, mut carol_rx) = registry.join(&info.room_hash, "carol").await.unwrap();
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pending_queue_is_bounded() {
        let registry = RoomRegistry::new();
        let info = registry.create_room("room-secret").await.unwrap();
        let (_id, _rx) = registry.join(&info.room_hash, "alice").await.unwrap();

        for i in 0..(MAX_PENDING_MESSAGES + 5) {
            registry
                .broadcast(&info.room_hash, "alice", CipherEnvelope::from_bytes(vec![i as u8]))
                .await;
        }

        let (_bob, mut bob_rx) = registry.join(&info.room_hash, "bob").await.unwrap();
        let first: ChatBroadcast = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.text.as_bytes(), &[5]);

        let mut count = 1;
        while bob_rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, MAX_PENDING_MESSAGES);
    }

    #[tokio::test]
    async fn users_follow_membership() {
        let registry = RoomRegistry::new();
        let info = registry.create_room("room-secret").await.unwrap();

        let (alice, _a) = registry.join(&info.room_hash, "alice").await.unwrap();
        let (_bob, _b) = registry.join(&info.room_hash, "bob").await.unwrap();
        assert_eq!(registry.users(&info.room_hash).await, vec!["alice", "bob"]);

        registry.leave(&info.room_hash, alice).await;
        assert_eq!(registry.users(&info.room_hash).await, vec!["bob"]);

        assert!(registry.users("unknown").await.is_empty());
        // Room survives its members leaving
        assert!(registry.room_info(&info.room_hash).await.is_some());
    }
}
