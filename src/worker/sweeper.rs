//! Inactivity and orphan sweeps
//!
//! Walks every persisted room and client record. Empty rooms go
//! immediately; idle rooms go once their timeout elapses, where a room
//! actively playing a video earns the extended timeout so a long feature
//! is not cut off. Client records pointing at dead rooms are dropped, as
//! are unbound records nobody has touched for a day.

use std::sync::Arc;

use crate::registry::ClientDirectory;
use crate::room::{now_ms, RoomRepository};
use crate::server::ServerConfig;
use crate::session::Dispatcher;
use crate::store::StateStore;

/// Unbound client records older than this are dropped.
const STALE_CLIENT_MS: i64 = 24 * 60 * 60 * 1000;

/// The sweep and integrity jobs
pub struct Sweeper {
    config: ServerConfig,
    store: Arc<dyn StateStore>,
    rooms: Arc<RoomRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl Sweeper {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn StateStore>,
        rooms: Arc<RoomRepository>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            store,
            rooms,
            dispatcher,
        }
    }

    /// One pass over rooms and client records.
    pub async fn sweep(&self) -> crate::Result<()> {
        self.sweep_rooms().await?;
        self.sweep_clients().await?;
        Ok(())
    }

    async fn sweep_rooms(&self) -> crate::Result<()> {
        let now = now_ms();
        let mut evicted = 0usize;

        for room_id in self.rooms.all_ids().await.map_err(map_repo)? {
            let room = match self.rooms.load(&room_id).await {
                Ok(room) => room,
                Err(e) => {
                    tracing::warn!(room = %room_id, error = %e, "Skipping unreadable room");
                    continue;
                }
            };

            let reason = if room.clients.is_empty() {
                Some("empty room")
            } else {
                let playing = room
                    .playing_now
                    .as_ref()
                    .filter(|_| room.is_playing)
                    .map(|v| v.duration);
                let timeout = self.config.eviction_timeout(playing);
                let elapsed_ms = now.saturating_sub(room.last_activity);
                (elapsed_ms > timeout.as_millis() as i64).then_some("inactivity")
            };

            if let Some(reason) = reason {
                if let Err(e) = self.dispatcher.close_room(&room_id, reason).await {
                    tracing::warn!(room = %room_id, error = %e, "Eviction failed");
                } else {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            tracing::info!(evicted, "Inactivity sweep evicted rooms");
        }
        Ok(())
    }

    async fn sweep_clients(&self) -> crate::Result<()> {
        let now = now_ms();

        for key in self.store.keys_with_prefix("client:").await? {
            let fields = self.store.hash_get_all(&key).await?;

            match fields.get(crate::registry::clients::ROOM_FIELD) {
                Some(room_id) => {
                    // A record naming a room that no longer exists is junk.
                    if !self.rooms.exists_id(room_id).await.map_err(map_repo)? {
                        tracing::debug!(key = %key, room = %room_id, "Dropping orphaned client record");
                        self.store.delete(&key).await?;
                    }
                }
                None => {
                    let last_seen = fields
                        .get(crate::registry::clients::LAST_SEEN_FIELD)
                        .and_then(|raw| raw.parse::<i64>().ok())
                        .unwrap_or(0);
                    if now.saturating_sub(last_seen) > STALE_CLIENT_MS {
                        tracing::debug!(key = %key, "Dropping stale unbound client record");
                        self.store.delete(&key).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reconcile rooms and client records both ways: drop records naming a
    /// dead room, and shrink each room's member list to clients that still
    /// have a record.
    pub async fn integrity_pass(&self) -> crate::Result<()> {
        for key in self.store.keys_with_prefix("client:").await? {
            let fields = self.store.hash_get_all(&key).await?;
            if let Some(room_id) = fields.get(crate::registry::clients::ROOM_FIELD) {
                if !self.rooms.exists_id(room_id).await.map_err(map_repo)? {
                    self.store.delete(&key).await?;
                }
            }
        }

        for room_id in self.rooms.all_ids().await.map_err(map_repo)? {
            let room = match self.rooms.load(&room_id).await {
                Ok(room) => room,
                Err(_) => continue,
            };

            let mut live = Vec::with_capacity(room.clients.len());
            for member in &room.clients {
                let key = ClientDirectory::storage_key(member);
                if self.store.exists(&key).await? {
                    live.push(member.clone());
                }
            }

            if live.len() != room.clients.len() {
                tracing::info!(
                    room = %room_id,
                    dropped = room.clients.len() - live.len(),
                    "Pruning members without client records"
                );
                let result = self
                    .rooms
                    .mutate(&room_id, move |r| {
                        r.clients.retain(|c| live.contains(c));
                        Ok(())
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!(room = %room_id, error = %e, "Member prune failed");
                }
            }
        }
        Ok(())
    }
}

fn map_repo(e: crate::room::RepositoryError) -> crate::Error {
    match e {
        crate::room::RepositoryError::Store(inner) => crate::Error::Store(inner),
        other => crate::Error::Config(other.to_string()),
    }
}
