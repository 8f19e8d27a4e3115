//! Client directory
//!
//! Maps a connection identity to the room it belongs to. Two surfaces back
//! the mapping: a process-local cache used by the broadcast bus to pick
//! delivery targets, and a persisted `client:<id>` hash used for reconnect
//! routing and orphan cleanup.

use std::sync::Arc;

use dashmap::DashMap;

use crate::room::now_ms;
use crate::store::{StateStore, StoreError};
use crate::ClientId;

pub const ROOM_FIELD: &str = "roomId";
pub const LAST_SEEN_FIELD: &str = "lastSeen";

/// Connection-to-room index
pub struct ClientDirectory {
    store: Arc<dyn StateStore>,
    /// Bindings for connections served by this process only
    local: DashMap<ClientId, String>,
}

impl ClientDirectory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            local: DashMap::new(),
        }
    }

    pub fn storage_key(client_id: &str) -> String {
        format!("client:{client_id}")
    }

    /// Record that a client joined a room.
    pub async fn bind(&self, client_id: &ClientId, room_id: &str) -> Result<(), StoreError> {
        self.local.insert(client_id.clone(), room_id.to_string());
        let key = Self::storage_key(client_id);
        self.store.hash_set(&key, ROOM_FIELD, room_id).await?;
        self.store
            .hash_set(&key, LAST_SEEN_FIELD, &now_ms().to_string())
            .await?;
        Ok(())
    }

    /// Remove the client's binding and its persisted record.
    pub async fn unbind(&self, client_id: &ClientId) -> Result<(), StoreError> {
        self.local.remove(client_id);
        self.store.delete(&Self::storage_key(client_id)).await
    }

    /// Refresh the persisted liveness stamp without touching the binding.
    pub async fn touch(&self, client_id: &ClientId) -> Result<(), StoreError> {
        self.store
            .hash_set(
                &Self::storage_key(client_id),
                LAST_SEEN_FIELD,
                &now_ms().to_string(),
            )
            .await
    }

    /// Room the client belongs to, if this process serves it.
    pub fn local_room_of(&self, client_id: &ClientId) -> Option<String> {
        self.local.get(client_id).map(|r| r.value().clone())
    }

    /// Room the client belongs to, consulting the persisted record when
    /// the connection lives on another instance.
    pub async fn room_of(&self, client_id: &ClientId) -> Result<Option<String>, StoreError> {
        if let Some(room_id) = self.local_room_of(client_id) {
            return Ok(Some(room_id));
        }
        let fields = self
            .store
            .hash_get_all(&Self::storage_key(client_id))
            .await?;
        Ok(fields.get(ROOM_FIELD).cloned())
    }

    /// Restore the local binding for a reconnecting client whose persisted
    /// record still names a room, making it a delivery target here again.
    pub fn rebind_local(&self, client_id: &ClientId, room_id: &str) {
        self.local.insert(client_id.clone(), room_id.to_string());
    }

    /// Forget the local binding only, e.g. when the socket goes away but
    /// the persisted record should survive for reconnect routing.
    pub fn forget_local(&self, client_id: &ClientId) {
        self.local.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn directory() -> ClientDirectory {
        ClientDirectory::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_bind_and_lookup() {
        let dir = directory();
        let a = "a".to_string();

        dir.bind(&a, "123456").await.unwrap();
        assert_eq!(dir.local_room_of(&a).as_deref(), Some("123456"));
        assert_eq!(dir.room_of(&a).await.unwrap().as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_unbind_removes_record() {
        let dir = directory();
        let a = "a".to_string();
        dir.bind(&a, "123456").await.unwrap();

        dir.unbind(&a).await.unwrap();
        assert!(dir.local_room_of(&a).is_none());
        assert!(dir.room_of(&a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persisted_lookup_without_local_binding() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let writer = ClientDirectory::new(Arc::clone(&store));
        let reader = ClientDirectory::new(store);
        let a = "a".to_string();

        writer.bind(&a, "123456").await.unwrap();
        // The reader plays the part of another instance: no local binding,
        // but the persisted record resolves.
        assert!(reader.local_room_of(&a).is_none());
        assert_eq!(reader.room_of(&a).await.unwrap().as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_rebind_local_after_reconnect() {
        let dir = directory();
        let a = "a".to_string();
        dir.bind(&a, "123456").await.unwrap();
        dir.forget_local(&a);
        assert!(dir.local_room_of(&a).is_none());

        dir.rebind_local(&a, "123456");
        assert_eq!(dir.local_room_of(&a).as_deref(), Some("123456"));
    }

    #[tokio::test]
    async fn test_touch_writes_last_seen() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let dir = ClientDirectory::new(Arc::clone(&store));
        let a = "a".to_string();

        dir.touch(&a).await.unwrap();
        let fields = store
            .hash_get_all(&ClientDirectory::storage_key(&a))
            .await
            .unwrap();
        assert!(fields.contains_key(LAST_SEEN_FIELD));
        assert!(!fields.contains_key(ROOM_FIELD));
    }
}
