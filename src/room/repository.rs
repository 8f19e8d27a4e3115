//! Room persistence
//!
//! The repository is the only reader and writer of `room:<id>` records.
//! Mutations run under the store's per-room lock, so a concurrent command
//! on the same room waits instead of clobbering.

use std::sync::Arc;

use bytes::Bytes;
use rand::Rng;

use crate::protocol::CommandError;
use crate::store::{StateStore, StoreError};

use super::state::Room;
use super::now_ms;

/// Error type for repository operations
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// A room with this id already exists
    #[error("room id already taken")]
    Conflict,

    /// No room with this id
    #[error("room not found")]
    NotFound,

    /// The mutation closure rejected the command
    #[error("{0}")]
    Rejected(CommandError),

    /// The stored blob does not decode
    #[error("corrupt room record: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for CommandError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Rejected(inner) => inner,
            RepositoryError::NotFound => CommandError::RoomNotFound,
            RepositoryError::Store(inner) => inner.into(),
            other => {
                tracing::error!(error = %other, "Repository failure during command");
                CommandError::Internal
            }
        }
    }
}

/// Authoritative store for [`Room`] records
pub struct RoomRepository {
    store: Arc<dyn StateStore>,
}

impl RoomRepository {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Persist a new room. Fails with [`RepositoryError::Conflict`] when
    /// the id is already taken.
    pub async fn create(&self, room: &Room) -> Result<(), RepositoryError> {
        let key = Room::storage_key(&room.id);
        let _guard = self.store.lock(&key).await?;
        if self.store.exists(&key).await? {
            return Err(RepositoryError::Conflict);
        }
        self.store.set(&key, encode(room)?).await?;
        tracing::info!(room = %room.id, creator = %room.creator_id, "Room created");
        Ok(())
    }

    pub async fn load(&self, room_id: &str) -> Result<Room, RepositoryError> {
        let raw = self
            .store
            .get(&Room::storage_key(room_id))
            .await?
            .ok_or(RepositoryError::NotFound)?;
        decode(&raw)
    }

    /// Atomic read-modify-write.
    ///
    /// `f` sees the current state and either applies a transition or
    /// rejects; a rejection writes nothing back. On success the room's
    /// activity clock is bumped and the new state is returned for
    /// broadcasting.
    pub async fn mutate<F>(&self, room_id: &str, f: F) -> Result<Room, RepositoryError>
    where
        F: FnOnce(&mut Room) -> Result<(), CommandError>,
    {
        let key = Room::storage_key(room_id);
        let _guard = self.store.lock(&key).await?;

        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or(RepositoryError::NotFound)?;
        let mut room = decode(&raw)?;

        f(&mut room).map_err(RepositoryError::Rejected)?;
        room.touch(now_ms());

        self.store.set(&key, encode(&room)?).await?;
        Ok(room)
    }

    pub async fn delete(&self, room_id: &str) -> Result<(), RepositoryError> {
        self.store.delete(&Room::storage_key(room_id)).await?;
        tracing::info!(room = %room_id, "Room deleted");
        Ok(())
    }

    pub async fn exists_id(&self, room_id: &str) -> Result<bool, RepositoryError> {
        Ok(self.store.exists(&Room::storage_key(room_id)).await?)
    }

    /// Draw an unused 6-digit room id, re-rolling on collision.
    pub async fn generate_id(&self) -> Result<String, RepositoryError> {
        loop {
            let id = rand::thread_rng().gen_range(100_000..=999_999).to_string();
            if !self.exists_id(&id).await? {
                return Ok(id);
            }
            tracing::debug!(room = %id, "Room id collision, re-rolling");
        }
    }

    /// Ids of every persisted room.
    pub async fn all_ids(&self) -> Result<Vec<String>, RepositoryError> {
        let keys = self.store.keys_with_prefix("room:").await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix("room:").map(str::to_string))
            .collect())
    }
}

fn encode(room: &Room) -> Result<Bytes, RepositoryError> {
    serde_json::to_vec(room)
        .map(Bytes::from)
        .map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

fn decode(raw: &[u8]) -> Result<Room, RepositoryError> {
    serde_json::from_slice(raw).map_err(|e| RepositoryError::Corrupt(e.to_string()))
}
