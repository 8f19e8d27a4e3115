//! Room broadcast bus
//!
//! Fan-out of server events to every member of a room, across instances.
//! Events are published on a single well-known pub/sub channel; each
//! process runs one listener that forwards to the connections it serves.
//! Per-publisher order is preserved by the channel; delivery is best
//! effort, and a failed local delivery only affects that one connection.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::protocol::ServerEvent;
use crate::store::{StateStore, StoreError};
use crate::ClientId;

use super::clients::ClientDirectory;
use super::connections::ConnectionRegistry;

/// The pub/sub channel carrying every room event.
pub const ROOM_CHANNEL: &str = "room-notifications";

/// One event in flight on the pub/sub channel.
///
/// Without `targets` the event goes to every member of the room; with
/// `targets` only the listed identities receive it (used for per-member
/// frames like `roomClosed`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusFrame {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<ClientId>>,
    pub event: ServerEvent,
}

/// Cross-instance event fan-out
pub struct RoomBus {
    store: Arc<dyn StateStore>,
    connections: Arc<ConnectionRegistry>,
    directory: Arc<ClientDirectory>,
}

impl RoomBus {
    pub fn new(
        store: Arc<dyn StateStore>,
        connections: Arc<ConnectionRegistry>,
        directory: Arc<ClientDirectory>,
    ) -> Self {
        Self {
            store,
            connections,
            directory,
        }
    }

    /// Subscribe this process to the room channel and spawn the listener.
    ///
    /// The listener runs for the life of the process; it must never block
    /// on a slow connection, which the unbounded per-connection channels
    /// guarantee.
    pub async fn start(self: &Arc<Self>) -> Result<JoinHandle<()>, StoreError> {
        let mut rx = self.store.subscribe(ROOM_CHANNEL).await?;
        let bus = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                bus.deliver(&payload);
            }
            tracing::warn!("Room event listener ended");
        }))
    }

    /// Publish an event to every member of a room, fleet-wide.
    pub async fn broadcast(&self, room_id: &str, event: ServerEvent) -> Result<(), StoreError> {
        self.publish(BusFrame {
            room_id: room_id.to_string(),
            targets: None,
            event,
        })
        .await
    }

    /// Publish an event to specific members of a room, fleet-wide.
    pub async fn broadcast_to(
        &self,
        room_id: &str,
        targets: Vec<ClientId>,
        event: ServerEvent,
    ) -> Result<(), StoreError> {
        self.publish(BusFrame {
            room_id: room_id.to_string(),
            targets: Some(targets),
            event,
        })
        .await
    }

    /// Deliver directly to one locally connected client, skipping the
    /// pub/sub hop. Replies to the issuing connection use this path.
    pub fn send_local(&self, client_id: &ClientId, event: ServerEvent) -> bool {
        self.connections.send_to(client_id, event)
    }

    async fn publish(&self, frame: BusFrame) -> Result<(), StoreError> {
        let payload = match serde_json::to_vec(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(room = %frame.room_id, error = %e, "Failed to encode bus frame");
                return Ok(());
            }
        };
        self.store.publish(ROOM_CHANNEL, Bytes::from(payload)).await
    }

    fn deliver(&self, payload: &[u8]) {
        let frame: BusFrame = match serde_json::from_slice(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable bus frame");
                return;
            }
        };

        match frame.targets {
            Some(targets) => {
                // A room closure must also clear the local binding of
                // members served by this instance, whichever instance
                // initiated the close.
                let closing = matches!(frame.event, ServerEvent::RoomClosed { .. });
                for client_id in &targets {
                    if closing {
                        self.directory.forget_local(client_id);
                    }
                    self.connections.send_to(client_id, frame.event.clone());
                }
            }
            None => {
                for client_id in self.connections.ids() {
                    if self.directory.local_room_of(&client_id).as_deref()
                        == Some(frame.room_id.as_str())
                    {
                        self.connections.send_to(&client_id, frame.event.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    struct Harness {
        bus: Arc<RoomBus>,
        connections: Arc<ConnectionRegistry>,
        directory: Arc<ClientDirectory>,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let directory = Arc::new(ClientDirectory::new(Arc::clone(&store)));
        let bus = Arc::new(RoomBus::new(
            store,
            Arc::clone(&connections),
            Arc::clone(&directory),
        ));
        bus.start().await.unwrap();
        Harness {
            bus,
            connections,
            directory,
        }
    }

    async fn connect(
        h: &Harness,
        id: &str,
        room: Option<&str>,
    ) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        h.connections.register(id.to_string(), tx);
        if let Some(room) = room {
            h.directory.bind(&id.to_string(), room).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_broadcast_reaches_members_only() {
        let h = harness().await;
        let mut a = connect(&h, "a", Some("111111")).await;
        let mut b = connect(&h, "b", Some("111111")).await;
        let mut other = connect(&h, "c", Some("222222")).await;

        h.bus.broadcast("111111", ServerEvent::Play).await.unwrap();

        assert!(matches!(a.recv().await.unwrap(), ServerEvent::Play));
        assert!(matches!(b.recv().await.unwrap(), ServerEvent::Play));
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_broadcast() {
        let h = harness().await;
        let mut a = connect(&h, "a", Some("111111")).await;
        let mut b = connect(&h, "b", Some("111111")).await;

        h.bus
            .broadcast_to(
                "111111",
                vec!["b".to_string()],
                ServerEvent::RoomClosed {
                    reason: "inactivity".to_string(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            b.recv().await.unwrap(),
            ServerEvent::RoomClosed { .. }
        ));
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_order_preserved_per_publisher() {
        let h = harness().await;
        let mut a = connect(&h, "a", Some("111111")).await;

        for volume in [10u8, 20, 30] {
            h.bus
                .broadcast("111111", ServerEvent::VolumeChanged { volume })
                .await
                .unwrap();
        }

        for expected in [10u8, 20, 30] {
            match a.recv().await.unwrap() {
                ServerEvent::VolumeChanged { volume } => assert_eq!(volume, expected),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dead_connection_does_not_block_others() {
        let h = harness().await;
        let dead_rx = connect(&h, "a", Some("111111")).await;
        drop(dead_rx);
        let mut b = connect(&h, "b", Some("111111")).await;

        h.bus.broadcast("111111", ServerEvent::Pause).await.unwrap();

        assert!(matches!(b.recv().await.unwrap(), ServerEvent::Pause));
        // The dead handle was evicted during delivery.
        assert_eq!(h.connections.len(), 1);
    }

    #[tokio::test]
    async fn test_send_local_skips_pubsub() {
        let h = harness().await;
        let mut a = connect(&h, "a", None).await;

        assert!(h.bus.send_local(&"a".to_string(), ServerEvent::Pong));
        assert!(matches!(a.recv().await.unwrap(), ServerEvent::Pong));
    }
}
