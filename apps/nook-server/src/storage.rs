use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use crate::error::StoreError;
use crate::room::{RoomId, RoomState};

/// Durable, TTL'd home of room state. The dispatcher and broadcaster only
/// ever reach room state through this interface, never through shared maps.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError>;
    /// Persist the state and set/refresh its TTL. An active room is written
    /// on every mutation, so it never expires mid-session.
    async fn put(&self, room_id: &RoomId, state: &RoomState) -> Result<(), StoreError>;
}

/// `get` that degrades to absence when the store is unreachable. Absence is
/// "needs hydration", never an error, so a flaky backing store cannot crash
/// a live room.
pub async fn load_room(store: &dyn RoomStore, room_id: &RoomId) -> Option<RoomState> {
    match store.get(room_id).await {
        Ok(state) => state,
        Err(err) => {
            warn!(room = %room_id, error = %err, "room load failed; treating as absent");
            None
        }
    }
}

/// Fire-and-forget-logged `put`.
pub async fn save_room(store: &dyn RoomStore, room_id: &RoomId, state: &RoomState) {
    if let Err(err) = store.put(room_id, state).await {
        warn!(room = %room_id, error = %err, "room persist failed; continuing in memory");
    }
}

#[derive(Clone)]
pub struct RedisStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl RedisStore {
    pub async fn new(redis_url: &str, ttl_seconds: u64) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(StoreError::Unavailable)?;
        let redis = ConnectionManager::new(client)
            .await
            .map_err(StoreError::Unavailable)?;
        Ok(Self { redis, ttl_seconds })
    }
}

#[async_trait]
impl RoomStore for RedisStore {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(room_id.storage_key()).await?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, room_id: &RoomId, state: &RoomState) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(state)?;
        conn.set_ex::<_, _, ()>(room_id.storage_key(), value, self.ttl_seconds)
            .await?;
        Ok(())
    }
}

/// In-memory store for tests and single-process development. Ignores TTL.
#[derive(Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<String, RoomState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get(&self, room_id: &RoomId) -> Result<Option<RoomState>, StoreError> {
        let rooms = self.rooms.lock().unwrap();
        Ok(rooms.get(room_id.as_str()).cloned())
    }

    async fn put(&self, room_id: &RoomId, state: &RoomState) -> Result<(), StoreError> {
        let mut rooms = self.rooms.lock().unwrap();
        rooms.insert(room_id.as_str().to_string(), state.clone());
        Ok(())
    }
}
