//! Process-local connection table

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;
use crate::ClientId;

/// Outbound senders for every connection served by this process.
///
/// The connection handler registers its sender on accept and drops it on
/// close; delivery happens from the broadcast bus and the dispatcher.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ClientId, mpsc::UnboundedSender<ServerEvent>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: ClientId, sender: mpsc::UnboundedSender<ServerEvent>) {
        self.connections.insert(client_id, sender);
    }

    pub fn drop_connection(&self, client_id: &ClientId) {
        self.connections.remove(client_id);
    }

    /// Deliver one event to one local connection.
    ///
    /// A failed send means the connection's writer is gone; the handle is
    /// dropped so the connection gets cleaned up and no further deliveries
    /// are attempted.
    pub fn send_to(&self, client_id: &ClientId, event: ServerEvent) -> bool {
        let delivered = match self.connections.get(client_id) {
            Some(sender) => sender.send(event).is_ok(),
            None => return false,
        };
        if !delivered {
            tracing::warn!(client = %client_id, "Outbound channel closed, dropping connection");
            self.connections.remove(client_id);
        }
        delivered
    }

    /// Identities of every locally connected client.
    pub fn ids(&self) -> Vec<ClientId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
